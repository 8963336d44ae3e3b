//! Deferred operation engine.
//!
//! [`LongOpEngine`] drives the lifecycle `begin → (Pending → Ready) →
//! complete`, or `cancel`, across independent requests. It keeps no state of
//! its own: everything that must survive between requests is written to the
//! [`Datastore`], and `Ready` is derived from the clock on every read.
//!
//! All writes go through a single `claim_operation` (begin) or `commit`
//! (complete, cancel), so a rejected request never leaves partial state.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::checks::do_checks;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::entity::{Character, Entity, EntityKey, IdeaDefinition};
use crate::error::{LongOpError, LongOpResult, StorageError, UserError};
use crate::kinds::{ConstructionPayload, EffectInput, KindSpec};
use crate::operation::{current_phase, DeferredOperation, OperationId, OperationKind, PayloadEnvelope, Phase};
use crate::params::BeginRequest;
use crate::pool::{EntityPool, PoolError};
use crate::resolver::{expand_slots, fingerprint, requirement_keys, RequirementSlotResolver};
use crate::storage::{ChangeSet, Datastore};

/// Result of a successful `begin`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BeginOutcome {
    pub operation_id: OperationId,
    pub delay_millis: u64,
    pub description: String,
}

/// Result of a successful `complete`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompleteOutcome {
    pub operation_id: OperationId,
    /// Player-facing message.
    pub message: String,
    /// Short result line, e.g. "Experimentation complete."
    pub result: String,
    /// Entities the effect created.
    pub created: Vec<EntityKey>,
}

/// What a client needs to re-open the UI for an interrupted operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResumeHint {
    pub kind: OperationKind,
    /// Request parameter the subject id goes in (`ideaId`, `skillId`).
    pub subject_param: &'static str,
    pub subject_id: u64,
    pub subject_name: String,
}

/// Snapshot of an actor's active operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationView {
    pub operation_id: OperationId,
    pub kind: OperationKind,
    pub phase: Phase,
    pub remaining_millis: i64,
    pub description: String,
    pub resume: ResumeHint,
}

/// Result of `poll`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PollOutcome {
    Idle,
    Waiting {
        operation_id: OperationId,
        remaining_millis: i64,
    },
    Completed(CompleteOutcome),
}

/// A request routed through [`LongOpEngine::execute`].
#[derive(Debug, Clone)]
pub enum Request {
    Begin {
        actor: EntityKey,
        kind: OperationKind,
        params: HashMap<String, String>,
    },
    BeginTyped {
        actor: EntityKey,
        kind: OperationKind,
        request: BeginRequest,
    },
    Complete {
        actor: EntityKey,
    },
    Cancel {
        actor: EntityKey,
    },
    Describe {
        actor: EntityKey,
    },
    Poll {
        actor: EntityKey,
    },
}

impl Request {
    /// The actor the request acts for.
    #[must_use]
    pub const fn actor(&self) -> EntityKey {
        match self {
            Self::Begin { actor, .. }
            | Self::BeginTyped { actor, .. }
            | Self::Complete { actor }
            | Self::Cancel { actor }
            | Self::Describe { actor }
            | Self::Poll { actor } => *actor,
        }
    }
}

/// Response to a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "response", content = "body", rename_all = "snake_case")]
pub enum Response {
    Begun(BeginOutcome),
    Completed(CompleteOutcome),
    Cancelled(OperationId),
    Described(OperationView),
    Polled(PollOutcome),
}

/// The deferred operation state machine.
pub struct LongOpEngine {
    store: Arc<dyn Datastore>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl LongOpEngine {
    /// Create an engine over `store` with the system clock and default config.
    #[must_use]
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn store(&self) -> &dyn Datastore {
        self.store.as_ref()
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute one request.
    pub fn execute(&self, request: Request) -> LongOpResult<Response> {
        match request {
            Request::Begin { actor, kind, params } => self.begin(actor, kind, &params).map(Response::Begun),
            Request::BeginTyped { actor, kind, request } => {
                self.begin_request(actor, kind, &request).map(Response::Begun)
            }
            Request::Complete { actor } => self.complete(actor).map(Response::Completed),
            Request::Cancel { actor } => self.cancel(actor).map(Response::Cancelled),
            Request::Describe { actor } => self.describe(actor).map(Response::Described),
            Request::Poll { actor } => self.poll(actor).map(Response::Polled),
        }
    }

    /// Starts an operation from raw request parameters.
    ///
    /// # Errors
    /// - `MalformedInput` for missing or non-numeric ids and bad selections
    /// - `PreconditionFailed`, `ActorBusy`, `UnsatisfiedRequirement`,
    ///   `InvalidSelection` for player-recoverable rejections
    pub fn begin(
        &self,
        actor: EntityKey,
        kind: OperationKind,
        params: &HashMap<String, String>,
    ) -> LongOpResult<BeginOutcome> {
        let spec = KindSpec::of(kind);
        let result = BeginRequest::parse(spec.subject_param, params)
            .map_err(LongOpError::from)
            .and_then(|request| self.begin_inner(actor, spec, &request));
        log_outcome("begin", actor, result)
    }

    /// Starts an operation from an already typed request.
    pub fn begin_request(
        &self,
        actor: EntityKey,
        kind: OperationKind,
        request: &BeginRequest,
    ) -> LongOpResult<BeginOutcome> {
        log_outcome("begin", actor, self.begin_inner(actor, KindSpec::of(kind), request))
    }

    /// Applies the effect of the actor's ready operation, exactly once.
    ///
    /// # Errors
    /// - `NoActiveOperation` when the actor has nothing to complete
    /// - `NotReady` before the scheduled time
    /// - `PreconditionFailed` when the actor can no longer act
    /// - `ResolutionStale` when the subject, definition or selected entities
    ///   changed since `begin`
    pub fn complete(&self, actor: EntityKey) -> LongOpResult<CompleteOutcome> {
        log_outcome("complete", actor, self.complete_inner(actor))
    }

    /// Cancels the actor's operation without applying any effect.
    ///
    /// # Errors
    /// `NoActiveOperation` when there is nothing to cancel.
    pub fn cancel(&self, actor: EntityKey) -> LongOpResult<OperationId> {
        log_outcome("cancel", actor, self.cancel_inner(actor))
    }

    /// Describes the actor's active operation.
    ///
    /// # Errors
    /// `NoActiveOperation` when the actor is idle.
    pub fn describe(&self, actor: EntityKey) -> LongOpResult<OperationView> {
        log_outcome("describe", actor, self.describe_inner(actor))
    }

    /// Completes the operation if it is ready, otherwise reports progress.
    pub fn poll(&self, actor: EntityKey) -> LongOpResult<PollOutcome> {
        let active = self.store.active_operation(actor);
        match active {
            Ok(None) => Ok(PollOutcome::Idle),
            Ok(Some(operation)) => {
                let now = self.clock.now();
                if current_phase(&operation, now) == Phase::Pending {
                    Ok(PollOutcome::Waiting {
                        operation_id: operation.id,
                        remaining_millis: operation.remaining_millis(now),
                    })
                } else {
                    self.complete(actor).map(PollOutcome::Completed)
                }
            }
            Err(e) => log_outcome("poll", actor, Err(e.into())),
        }
    }

    /// Guard for other command paths: fails while the actor has a
    /// non-terminal operation.
    ///
    /// # Errors
    /// `ActorBusy` if an operation is pending or ready.
    pub fn ensure_idle(&self, actor: EntityKey) -> LongOpResult<()> {
        if self.store.active_operation(actor)?.is_some() {
            return Err(UserError::ActorBusy.into());
        }
        Ok(())
    }

    /// Archived (completed or cancelled) operations, oldest first.
    pub fn history(&self, actor: EntityKey) -> LongOpResult<Vec<DeferredOperation>> {
        Ok(self.store.operation_history(actor)?)
    }

    fn begin_inner(
        &self,
        actor: EntityKey,
        spec: &'static KindSpec,
        request: &BeginRequest,
    ) -> LongOpResult<BeginOutcome> {
        let now = self.clock.now();
        let store = self.store.as_ref();
        let subject_key = EntityKey::new(spec.subject_kind, request.subject_id);

        let mut pool = EntityPool::new(store);
        pool.enqueue([actor, subject_key]);
        tolerate_missing(pool.load())?;

        let character = load_character(&pool, actor)?.clone();
        let subject = pool.get(&subject_key).ok_or_else(|| spec.invalid_subject())?;
        let subject_ref = spec.subject_ref(subject).ok_or_else(|| spec.invalid_subject())?;
        let subject_name = subject.name().to_string();

        do_checks(&character, spec.checks, spec.verb)?;
        spec.check_subject(actor, &subject_ref)?;
        if store.active_operation(actor)?.is_some() {
            return Err(UserError::ActorBusy.into());
        }

        pool.enqueue([subject_ref.definition]);
        pool.load().map_err(missing_is_internal)?;
        let definition = load_definition(&pool, subject_ref.definition)?.clone();

        for item in store.items_owned_by(actor)? {
            pool.add(item);
        }
        pool.enqueue(requirement_keys(&definition, spec.groups));
        pool.load().map_err(missing_is_internal)?;
        // Pinned items the actor does not hold; reconcile explains why they
        // cannot be used. Unknown ids stay absent.
        pool.enqueue(request.selections.iter().filter_map(|s| s.chosen));
        tolerate_missing(pool.load())?;

        let slots = expand_slots(&definition, spec.groups, &pool)?;
        let resolver = RequirementSlotResolver::new(&pool, actor);
        let selection = if request.selections.is_empty() {
            resolver.resolve(&slots)?
        } else {
            // Greedy automatic choices may conflict with pins; reconcile
            // re-resolves whatever no longer fits.
            let automatic = resolver.resolve(&slots).unwrap_or_default();
            resolver.reconcile(&slots, &automatic, &request.selections)?
        };
        resolver.verify(&slots, &selection)?;

        let secs = self.config.duration_secs(spec.configured_secs(&definition));
        let description = spec.description(secs, &definition);
        let payload = ConstructionPayload {
            subject: subject_key,
            subject_name,
            definition: subject_ref.definition,
            fingerprint: fingerprint(&slots)?,
            slots,
            selection,
        };
        let envelope = PayloadEnvelope::seal(spec.kind, spec.payload_version, &payload)?;
        let scheduled_at = i64::try_from(secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|delay| now.checked_add_signed(delay))
            .ok_or_else(|| LongOpError::internal(format!("duration of {secs}s is out of range")))?;
        let operation = DeferredOperation::pending(actor, spec.kind, now, scheduled_at, description.clone(), envelope);
        let operation_id = operation.id;

        store.claim_operation(operation).map_err(|e| match e {
            StorageError::ActorBusy { .. } => LongOpError::User(UserError::ActorBusy),
            other => other.into(),
        })?;
        info!(%actor, kind = %spec.kind, operation = %operation_id, delay_secs = secs, "operation begun");

        Ok(BeginOutcome {
            operation_id,
            delay_millis: secs.saturating_mul(1000),
            description,
        })
    }

    fn complete_inner(&self, actor: EntityKey) -> LongOpResult<CompleteOutcome> {
        let now = self.clock.now();
        let store = self.store.as_ref();
        let operation = store
            .active_operation(actor)?
            .ok_or(UserError::NoActiveOperation)?;
        if current_phase(&operation, now) == Phase::Pending {
            return Err(UserError::NotReady {
                remaining_millis: operation.remaining_millis(now),
            }
            .into());
        }

        let spec = KindSpec::of(operation.kind);
        let payload: ConstructionPayload = operation.payload.open(spec.kind, spec.payload_version)?;

        let mut pool = EntityPool::new(store);
        pool.enqueue([actor, payload.subject, payload.definition]);
        pool.enqueue(payload.slots.iter().map(|s| s.requirement));
        pool.enqueue(payload.selection.entities());
        tolerate_missing(pool.load())?;

        let actor_entity = pool
            .get(&actor)
            .ok_or_else(|| LongOpError::internal(format!("actor {actor} does not exist")))?;
        let character = load_character(&pool, actor)?;
        do_checks(character, spec.checks, spec.verb)?;

        let stale = |reason: &str| UserError::ResolutionStale {
            slot: payload.subject_name.clone(),
            reason: reason.to_string(),
        };
        let subject = pool
            .get(&payload.subject)
            .ok_or_else(|| stale("it no longer exists"))?;
        let subject_ref = spec
            .subject_ref(subject)
            .ok_or_else(|| stale("it is no longer what it was"))?;
        spec.check_subject(actor, &subject_ref)?;
        if subject_ref.definition != payload.definition {
            return Err(stale("its definition changed").into());
        }
        let definition_entity = pool
            .get(&payload.definition)
            .ok_or_else(|| stale("its definition no longer exists"))?;
        let definition = definition_entity
            .as_idea_definition()
            .ok_or_else(|| stale("its definition no longer exists"))?;

        if requirement_keys(definition, spec.groups).iter().any(|k| !pool.contains(k)) {
            return Err(stale("its requirements changed").into());
        }
        let slots = expand_slots(definition, spec.groups, &pool)?;
        if fingerprint(&slots)? != payload.fingerprint {
            return Err(stale("its requirements changed").into());
        }
        RequirementSlotResolver::new(&pool, actor).verify(&payload.slots, &payload.selection)?;

        let bound: BTreeMap<EntityKey, &Entity> = payload
            .selection
            .entities()
            .into_iter()
            .filter_map(|key| pool.get(&key).map(|e| (key, e)))
            .collect();
        let input = EffectInput {
            actor: actor_entity,
            subject,
            definition: definition_entity,
            payload: &payload,
            bound: &bound,
        };
        let effect = spec.effect(&input, store)?;

        let finished = operation.finished(Phase::Completed, now, Some(effect.result.clone()));
        let mut changes = effect.changes;
        changes.transition(operation.phase, finished);
        let writes = changes.write_count();
        store.commit(changes).map_err(|e| match e {
            StorageError::VersionConflict { key, .. } | StorageError::EntityNotFound(key) => {
                LongOpError::User(UserError::ResolutionStale {
                    slot: payload.subject_name.clone(),
                    reason: format!("{key} changed while finishing"),
                })
            }
            StorageError::PhaseConflict { .. } | StorageError::OperationNotFound(_) => {
                LongOpError::User(UserError::NoActiveOperation)
            }
            other => other.into(),
        })?;
        info!(%actor, kind = %spec.kind, operation = %operation.id, writes, "operation completed");

        Ok(CompleteOutcome {
            operation_id: operation.id,
            message: effect.message,
            result: effect.result,
            created: effect.created,
        })
    }

    fn cancel_inner(&self, actor: EntityKey) -> LongOpResult<OperationId> {
        let now = self.clock.now();
        let operation = self
            .store
            .active_operation(actor)?
            .ok_or(UserError::NoActiveOperation)?;
        let mut changes = ChangeSet::new();
        changes.transition(operation.phase, operation.finished(Phase::Cancelled, now, None));
        self.store.commit(changes).map_err(|e| match e {
            StorageError::PhaseConflict { .. } | StorageError::OperationNotFound(_) => {
                LongOpError::User(UserError::NoActiveOperation)
            }
            other => other.into(),
        })?;
        info!(%actor, kind = %operation.kind, operation = %operation.id, "operation cancelled");
        Ok(operation.id)
    }

    fn describe_inner(&self, actor: EntityKey) -> LongOpResult<OperationView> {
        let now = self.clock.now();
        let operation = self
            .store
            .active_operation(actor)?
            .ok_or(UserError::NoActiveOperation)?;
        let spec = KindSpec::of(operation.kind);
        let payload: ConstructionPayload = operation.payload.open(spec.kind, spec.payload_version)?;
        Ok(OperationView {
            operation_id: operation.id,
            kind: operation.kind,
            phase: current_phase(&operation, now),
            remaining_millis: operation.remaining_millis(now),
            description: operation.description.clone(),
            resume: ResumeHint {
                kind: operation.kind,
                subject_param: spec.subject_param,
                subject_id: payload.subject.id,
                subject_name: payload.subject_name,
            },
        })
    }
}

/// Player rejections are routine; everything else is logged as a failure.
fn log_outcome<T>(action: &'static str, actor: EntityKey, result: LongOpResult<T>) -> LongOpResult<T> {
    if let Err(err) = &result {
        if err.is_user_facing() {
            debug!(%actor, action, error = %err, "request rejected");
        } else {
            error!(%actor, action, error = %err, "request failed");
        }
    }
    result
}

/// Missing keys are judged by the caller after the load.
fn tolerate_missing(result: Result<(), PoolError>) -> LongOpResult<()> {
    match result {
        Ok(()) | Err(PoolError::NotFound { .. }) => Ok(()),
        Err(PoolError::Storage(e)) => Err(e.into()),
    }
}

fn missing_is_internal(err: PoolError) -> LongOpError {
    match err {
        PoolError::Storage(e) => e.into(),
        missing @ PoolError::NotFound { .. } => LongOpError::internal(missing.to_string()),
    }
}

fn load_character<'p>(pool: &'p EntityPool<'_>, actor: EntityKey) -> LongOpResult<&'p Character> {
    pool.get(&actor)
        .and_then(Entity::as_character)
        .ok_or_else(|| LongOpError::internal(format!("actor {actor} is not a stored character")))
}

fn load_definition<'p>(pool: &'p EntityPool<'_>, key: EntityKey) -> LongOpResult<&'p IdeaDefinition> {
    pool.get(&key)
        .and_then(Entity::as_idea_definition)
        .ok_or_else(|| LongOpError::internal(format!("{key} is not a stored definition")))
}

impl std::fmt::Debug for LongOpEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LongOpEngine").field("config", &self.config).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::entity::{GenericEntityRequirement, Idea, Item, TypePath};
    use crate::storage::InMemoryDatastore;
    use chrono::{TimeZone, Utc};

    const ADA: EntityKey = EntityKey::character(1);

    fn world() -> Vec<Entity> {
        let mut definition = IdeaDefinition {
            name: "Bow".to_string(),
            item_name: "Short bow".to_string(),
            item_type: TypePath::new("weapon/bow"),
            prototype_construction_secs: None,
            construction_secs: Some(3),
            requirements: BTreeMap::new(),
        };
        definition
            .requirements
            .insert("skillMaterialsRequired".to_string(), vec![EntityKey::requirement(100)]);
        vec![
            Entity::character(1, crate::entity::Character::new("Ada")),
            Entity::idea_definition(42, definition),
            Entity::idea(
                5,
                Idea {
                    name: "Bow".to_string(),
                    owner: ADA,
                    definition: EntityKey::new(crate::entity::EntityKind::IdeaDefinition, 42),
                },
            ),
            Entity::requirement(
                100,
                GenericEntityRequirement {
                    name: "Wood".to_string(),
                    accepted_types: vec![TypePath::new("material/wood")],
                    quantity: 1,
                },
            ),
            Entity::item(7, Item::new("Oak", "material/wood").owned_by(ADA)),
        ]
    }

    fn engine() -> (LongOpEngine, Arc<ManualClock>, Arc<InMemoryDatastore>) {
        let store = Arc::new(InMemoryDatastore::with_entities(world()).unwrap());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()));
        let engine = LongOpEngine::new(store.clone()).with_clock(clock.clone());
        (engine, clock, store)
    }

    fn idea_params() -> HashMap<String, String> {
        [("ideaId".to_string(), "5".to_string())].into_iter().collect()
    }

    #[test]
    fn test_default_duration_applies() {
        let (engine, _, _) = engine();
        let outcome = engine.begin(ADA, OperationKind::Prototype, &idea_params()).unwrap();
        assert_eq!(outcome.delay_millis, 5000);
        assert_eq!(outcome.description, "It will take 5 seconds to finish this prototype.");
    }

    fn set_prototype_secs(store: &InMemoryDatastore, secs: u64) {
        let key = EntityKey::new(crate::entity::EntityKind::IdeaDefinition, 42);
        let entity = store.get(key).unwrap().unwrap();
        let mut definition = entity.as_idea_definition().unwrap().clone();
        definition.prototype_construction_secs = Some(secs);
        store.replace(Entity::idea_definition(42, definition)).unwrap();
    }

    #[test]
    fn test_configured_duration_is_clamped() {
        let (engine, _, store) = engine();
        let engine = engine.with_config(EngineConfig {
            default_duration_secs: 5,
            min_duration_secs: 1,
            max_duration_secs: 3,
        });
        set_prototype_secs(&store, 600);

        let outcome = engine.begin(ADA, OperationKind::Prototype, &idea_params()).unwrap();
        assert_eq!(outcome.delay_millis, 3000);
        assert_eq!(engine.describe(ADA).unwrap().remaining_millis, 3000);
    }

    #[test]
    fn test_unrepresentable_schedule_is_rejected_without_state() {
        let (engine, _, store) = engine();
        let config = EngineConfig {
            default_duration_secs: 5,
            min_duration_secs: 0,
            max_duration_secs: crate::config::MAX_DURATION_SECS,
        };
        config.validate().unwrap();
        let engine = engine.with_config(config);
        set_prototype_secs(&store, 1_000_000_000_000_000);

        let err = engine.begin(ADA, OperationKind::Prototype, &idea_params()).unwrap_err();
        assert!(!err.is_user_facing());
        assert!(err.to_string().contains("out of range"));
        assert!(store.active_operation(ADA).unwrap().is_none());
        engine.ensure_idle(ADA).unwrap();
    }

    #[test]
    fn test_begin_rejects_missing_subject() {
        let (engine, _, _) = engine();
        let params = [("ideaId".to_string(), "404".to_string())].into_iter().collect();
        let err = engine.begin(ADA, OperationKind::Prototype, &params).unwrap_err();
        assert_eq!(err.user_message(), "Invalid idea specified.");
    }

    #[test]
    fn test_malformed_params_are_not_user_facing() {
        let (engine, _, store) = engine();
        let err = engine.begin(ADA, OperationKind::Prototype, &HashMap::new()).unwrap_err();
        assert!(err.is_validation());
        assert!(store.active_operation(ADA).unwrap().is_none());
    }

    #[test]
    fn test_describe_and_poll() {
        let (engine, clock, _) = engine();
        assert!(matches!(engine.poll(ADA).unwrap(), PollOutcome::Idle));
        engine.begin(ADA, OperationKind::Prototype, &idea_params()).unwrap();

        let view = engine.describe(ADA).unwrap();
        assert_eq!(view.phase, Phase::Pending);
        assert_eq!(view.remaining_millis, 5000);
        assert_eq!(view.resume.subject_param, "ideaId");
        assert_eq!(view.resume.subject_id, 5);
        assert!(matches!(engine.poll(ADA).unwrap(), PollOutcome::Waiting { remaining_millis: 5000, .. }));

        clock.advance(Duration::seconds(5));
        assert_eq!(engine.describe(ADA).unwrap().phase, Phase::Ready);
        let PollOutcome::Completed(outcome) = engine.poll(ADA).unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(outcome.result, "Experimentation complete.");
        assert!(matches!(engine.poll(ADA).unwrap(), PollOutcome::Idle));
    }

    #[test]
    fn test_cancel_releases_actor_without_effect() {
        let (engine, _, store) = engine();
        engine.begin(ADA, OperationKind::Prototype, &idea_params()).unwrap();
        assert!(engine.ensure_idle(ADA).is_err());

        let id = engine.cancel(ADA).unwrap();
        engine.ensure_idle(ADA).unwrap();
        assert!(store.get(EntityKey::item(7)).unwrap().is_some());
        let history = engine.history(ADA).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, id);
        assert_eq!(history[0].phase, Phase::Cancelled);

        let err = engine.cancel(ADA).unwrap_err();
        assert_eq!(err.as_user(), Some(&UserError::NoActiveOperation));
    }

    #[test]
    fn test_prototype_completion_turns_idea_into_skill() {
        let (engine, clock, store) = engine();
        engine.begin(ADA, OperationKind::Prototype, &idea_params()).unwrap();
        clock.advance(Duration::seconds(6));
        let outcome = engine.complete(ADA).unwrap();

        assert!(store.get(EntityKey::item(7)).unwrap().is_none(), "material consumed");
        assert!(
            store
                .get(EntityKey::new(crate::entity::EntityKind::Idea, 5))
                .unwrap()
                .is_none(),
            "idea became a skill"
        );
        let created = store.get_many(&outcome.created).unwrap();
        assert_eq!(created.len(), 2);
        assert!(created.iter().any(|e| e.as_skill().is_some()));
        let character = store.get(ADA).unwrap().unwrap();
        assert_eq!(character.version, 2);
        assert_eq!(character.as_character().unwrap().knowledge["idea:Bow"], 2);
    }

    #[test]
    fn test_execute_routes_requests() {
        let (engine, _, _) = engine();
        let response = engine
            .execute(Request::BeginTyped {
                actor: ADA,
                kind: OperationKind::Prototype,
                request: BeginRequest::new(5),
            })
            .unwrap();
        assert!(matches!(response, Response::Begun(_)));
        let err = engine.execute(Request::Complete { actor: ADA }).unwrap_err();
        assert!(matches!(err.as_user(), Some(UserError::NotReady { .. })));
        assert_eq!(Request::Poll { actor: ADA }.actor(), ADA);
    }

    #[test]
    fn test_payload_kind_mismatch_is_detected() {
        let (engine, _, store) = engine();
        engine.begin(ADA, OperationKind::Prototype, &idea_params()).unwrap();
        let mut operation = store.active_operation(ADA).unwrap().unwrap();
        operation.payload.schema_version = 99;
        store.replace_operation(operation).unwrap();

        let err = engine.describe(ADA).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.user_message(), crate::error::GENERIC_FAILURE);
    }
}
