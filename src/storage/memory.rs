//! In-memory storage backend.
//!
//! Thread-safe reference implementation of [`Datastore`], used for embedded
//! servers and tests. The validation and apply logic lives on
//! [`StoreState`] so the write-ahead-logged backend replays exactly the same
//! transitions.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityKey, EntityKind};
use crate::operation::{DeferredOperation, Phase};
use crate::storage::traits::{ChangeSet, Datastore, StorageError};

pub(crate) fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Archived operations kept per actor unless configured otherwise.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Full store contents, as written by log compaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub entities: Vec<Entity>,
    pub active: Vec<DeferredOperation>,
    /// Archived operations, grouped by actor and oldest first within each.
    pub history: Vec<DeferredOperation>,
    pub next_id: u64,
}

/// Entities, owner index and operation slots.
#[derive(Debug)]
pub(crate) struct StoreState {
    entities: BTreeMap<EntityKey, Entity>,
    by_owner: HashMap<EntityKey, BTreeSet<EntityKey>>,
    active: HashMap<EntityKey, DeferredOperation>,
    history: HashMap<EntityKey, Vec<DeferredOperation>>,
    history_limit: usize,
    next_id: u64,
}

impl Default for StoreState {
    fn default() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }
}

fn item_owner(entity: &Entity) -> Option<EntityKey> {
    entity.as_item().and_then(|item| item.owner)
}

impl StoreState {
    pub(crate) fn with_history_limit(history_limit: usize) -> Self {
        Self {
            entities: BTreeMap::new(),
            by_owner: HashMap::new(),
            active: HashMap::new(),
            history: HashMap::new(),
            history_limit,
            next_id: 0,
        }
    }

    #[cfg_attr(not(feature = "persistent"), allow(dead_code))]
    pub(crate) fn snapshot(&self) -> StoreSnapshot {
        let mut active: Vec<DeferredOperation> = self.active.values().cloned().collect();
        active.sort_by_key(|op| op.owner);
        let mut actors: Vec<&EntityKey> = self.history.keys().collect();
        actors.sort();
        let history = actors
            .into_iter()
            .flat_map(|actor| self.history[actor].iter().cloned())
            .collect();
        StoreSnapshot {
            entities: self.entities.values().cloned().collect(),
            active,
            history,
            next_id: self.next_id,
        }
    }

    /// Replaces everything with `snapshot`, keeping the history limit.
    #[cfg_attr(not(feature = "persistent"), allow(dead_code))]
    pub(crate) fn restore(&mut self, snapshot: StoreSnapshot) {
        *self = Self::with_history_limit(self.history_limit);
        for entity in snapshot.entities {
            self.put(entity);
        }
        for operation in snapshot.active {
            self.active.insert(operation.owner, operation);
        }
        for operation in snapshot.history {
            self.archive(operation);
        }
        self.next_id = self.next_id.max(snapshot.next_id);
    }

    fn archive(&mut self, operation: DeferredOperation) {
        let archived = self.history.entry(operation.owner).or_default();
        archived.push(operation);
        let excess = archived.len().saturating_sub(self.history_limit);
        archived.drain(..excess);
    }

    pub(crate) fn get(&self, key: &EntityKey) -> Option<&Entity> {
        self.entities.get(key)
    }

    pub(crate) fn get_many(&self, keys: &[EntityKey]) -> Vec<Entity> {
        let mut seen = BTreeSet::new();
        keys.iter()
            .filter(|k| seen.insert(**k))
            .filter_map(|k| self.entities.get(k).cloned())
            .collect()
    }

    pub(crate) fn items_owned_by(&self, owner: EntityKey) -> Vec<Entity> {
        self.by_owner
            .get(&owner)
            .map(|keys| keys.iter().filter_map(|k| self.entities.get(k).cloned()).collect())
            .unwrap_or_default()
    }

    pub(crate) fn active_operation(&self, actor: EntityKey) -> Option<DeferredOperation> {
        self.active.get(&actor).cloned()
    }

    pub(crate) fn history(&self, actor: EntityKey) -> Vec<DeferredOperation> {
        self.history.get(&actor).cloned().unwrap_or_default()
    }

    pub(crate) fn allocate_id(&mut self) -> u64 {
        self.next_id = self.next_id.max(1);
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn bump_next_id(&mut self, id: u64) {
        self.next_id = self.next_id.max(id.saturating_add(1));
    }

    fn put(&mut self, entity: Entity) {
        if let Some(prev) = self.entities.get(&entity.key) {
            if let Some(owner) = item_owner(prev) {
                if let Some(set) = self.by_owner.get_mut(&owner) {
                    set.remove(&entity.key);
                    if set.is_empty() {
                        self.by_owner.remove(&owner);
                    }
                }
            }
        }
        if let Some(owner) = item_owner(&entity) {
            self.by_owner.entry(owner).or_default().insert(entity.key);
        }
        self.bump_next_id(entity.key.id);
        self.entities.insert(entity.key, entity);
    }

    fn remove(&mut self, key: &EntityKey) {
        if let Some(prev) = self.entities.remove(key) {
            if let Some(owner) = item_owner(&prev) {
                if let Some(set) = self.by_owner.get_mut(&owner) {
                    set.remove(key);
                    if set.is_empty() {
                        self.by_owner.remove(&owner);
                    }
                }
            }
        }
    }

    pub(crate) fn check_insert(&self, entity: &Entity) -> Result<(), StorageError> {
        if self.entities.contains_key(&entity.key) {
            return Err(StorageError::DuplicateKey(entity.key.to_string()));
        }
        Ok(())
    }

    pub(crate) fn apply_insert(&mut self, entity: Entity) {
        self.put(entity);
    }

    pub(crate) fn check_claim(&self, operation: &DeferredOperation) -> Result<(), StorageError> {
        if operation.phase != Phase::Pending {
            return Err(StorageError::PhaseConflict {
                operation: operation.id,
                expected: Phase::Pending,
                actual: operation.phase,
            });
        }
        if let Some(existing) = self.active.get(&operation.owner) {
            return Err(StorageError::ActorBusy {
                actor: operation.owner,
                operation: existing.id,
            });
        }
        Ok(())
    }

    pub(crate) fn apply_claim(&mut self, operation: DeferredOperation) {
        self.active.insert(operation.owner, operation);
    }

    fn check_version(&self, key: EntityKey, expected: u64) -> Result<(), StorageError> {
        let actual = self.entities.get(&key).map(|e| e.version);
        if actual != Some(expected) {
            return Err(StorageError::VersionConflict {
                key,
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Checks every precondition of `changes` without writing anything.
    pub(crate) fn validate(&self, changes: &ChangeSet) -> Result<(), StorageError> {
        let mut touched = BTreeSet::new();
        for guard in &changes.guards {
            self.check_version(guard.key, guard.version)?;
        }
        for entity in &changes.updates {
            self.check_version(entity.key, entity.version)?;
            if !touched.insert(entity.key) {
                return Err(StorageError::BackendError(format!(
                    "entity {} written twice in one change set",
                    entity.key
                )));
            }
        }
        for delete in &changes.deletes {
            self.check_version(delete.key, delete.version)?;
            if !touched.insert(delete.key) {
                return Err(StorageError::BackendError(format!(
                    "entity {} written twice in one change set",
                    delete.key
                )));
            }
        }
        for entity in &changes.inserts {
            self.check_insert(entity)?;
            if !touched.insert(entity.key) {
                return Err(StorageError::DuplicateKey(entity.key.to_string()));
            }
        }
        if let Some(transition) = &changes.operation {
            let op = &transition.operation;
            let current = self
                .active
                .get(&op.owner)
                .filter(|current| current.id == op.id)
                .ok_or(StorageError::OperationNotFound(op.id))?;
            if current.phase != transition.expected_phase {
                return Err(StorageError::PhaseConflict {
                    operation: op.id,
                    expected: transition.expected_phase,
                    actual: current.phase,
                });
            }
        }
        Ok(())
    }

    /// Applies a change set that already passed [`StoreState::validate`].
    pub(crate) fn apply(&mut self, changes: ChangeSet) {
        for delete in &changes.deletes {
            self.remove(&delete.key);
        }
        for mut entity in changes.updates {
            entity.version += 1;
            self.put(entity);
        }
        for entity in changes.inserts {
            self.put(entity);
        }
        if let Some(transition) = changes.operation {
            let op = transition.operation;
            if op.is_terminal() {
                self.active.remove(&op.owner);
                self.archive(op);
            } else {
                self.active.insert(op.owner, op);
            }
        }
    }
}

/// Request counters, exposed for round-trip assertions.
#[derive(Debug, Default)]
pub struct StoreStats {
    batch_gets: AtomicU64,
    owner_scans: AtomicU64,
    commits: AtomicU64,
}

impl StoreStats {
    #[must_use]
    pub fn batch_gets(&self) -> u64 {
        self.batch_gets.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn owner_scans(&self) -> u64 {
        self.owner_scans.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    pub(crate) fn record_get(&self) {
        self.batch_gets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_scan(&self) {
        self.owner_scans.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }
}

/// Thread-safe in-memory datastore.
#[derive(Debug, Default)]
pub struct InMemoryDatastore {
    state: RwLock<StoreState>,
    stats: StoreStats,
}

impl InMemoryDatastore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store keeping at most `limit` archived operations per
    /// actor.
    #[must_use]
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            state: RwLock::new(StoreState::with_history_limit(limit)),
            stats: StoreStats::default(),
        }
    }

    /// Create a store pre-populated with `entities`.
    pub fn with_entities(entities: impl IntoIterator<Item = Entity>) -> Result<Self, StorageError> {
        let store = Self::new();
        for entity in entities {
            store.insert(entity)?;
        }
        Ok(store)
    }

    #[must_use]
    pub const fn stats(&self) -> &StoreStats {
        &self.stats
    }

    /// Remove an entity outright, bypassing version checks (admin/test use).
    pub fn remove(&self, key: EntityKey) -> Result<Option<Entity>, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("store.remove"))?;
        let prev = state.get(&key).cloned();
        state.remove(&key);
        Ok(prev)
    }

    /// Overwrite an entity outright, bumping its version (admin/test use).
    pub fn replace(&self, mut entity: Entity) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("store.replace"))?;
        entity.version = state.get(&entity.key).map_or(1, |prev| prev.version + 1);
        state.put(entity);
        Ok(())
    }

    /// Overwrite the active operation record of its owner (admin/test use).
    pub fn replace_operation(&self, operation: DeferredOperation) -> Result<(), StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("store.replace_operation"))?;
        if state.active_operation(operation.owner).map(|op| op.id) != Some(operation.id) {
            return Err(StorageError::OperationNotFound(operation.id));
        }
        state.apply_claim(operation);
        Ok(())
    }
}

impl Datastore for InMemoryDatastore {
    fn get_many(&self, keys: &[EntityKey]) -> Result<Vec<Entity>, StorageError> {
        self.stats.record_get();
        let state = self.state.read().map_err(|_| lock_err("store.get_many"))?;
        Ok(state.get_many(keys))
    }

    fn items_owned_by(&self, owner: EntityKey) -> Result<Vec<Entity>, StorageError> {
        self.stats.record_scan();
        let state = self.state.read().map_err(|_| lock_err("store.items_owned_by"))?;
        Ok(state.items_owned_by(owner))
    }

    fn insert(&self, entity: Entity) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("store.insert"))?;
        state.check_insert(&entity)?;
        state.apply_insert(entity);
        Ok(())
    }

    fn allocate_id(&self, _kind: EntityKind) -> Result<u64, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("store.allocate_id"))?;
        Ok(state.allocate_id())
    }

    fn active_operation(&self, actor: EntityKey) -> Result<Option<DeferredOperation>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("store.active_operation"))?;
        Ok(state.active_operation(actor))
    }

    fn claim_operation(&self, operation: DeferredOperation) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("store.claim_operation"))?;
        state.check_claim(&operation)?;
        state.apply_claim(operation);
        Ok(())
    }

    fn commit(&self, changes: ChangeSet) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("store.commit"))?;
        state.validate(&changes)?;
        state.apply(changes);
        self.stats.record_commit();
        Ok(())
    }

    fn operation_history(&self, actor: EntityKey) -> Result<Vec<DeferredOperation>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("store.operation_history"))?;
        Ok(state.history(actor))
    }
}
