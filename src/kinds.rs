//! Per-kind behavior.
//!
//! Everything that differs between operation kinds lives in one static
//! [`KindSpec`] row: which request parameter names the subject, which checks
//! run, which definition fields become requirement slots, how long the
//! operation takes, and what its effect writes. The engine itself is
//! kind-agnostic.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::checks::{Check, CheckSet};
use crate::entity::{Entity, EntityKey, EntityKind, IdeaDefinition, Item, Skill};
use crate::error::{LongOpError, LongOpResult, UserError};
use crate::operation::OperationKind;
use crate::resolver::{RequirementGroup, RequirementSlot, ResolvedSelection};
use crate::storage::{ChangeSet, Datastore};

/// State captured at begin time and re-checked at completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstructionPayload {
    /// The idea or skill the operation works on.
    pub subject: EntityKey,
    pub subject_name: String,
    pub definition: EntityKey,
    pub slots: Vec<RequirementSlot>,
    pub selection: ResolvedSelection,
    /// Digest of `slots`, see [`crate::resolver::fingerprint`].
    pub fingerprint: String,
}

const fn group(label: &'static str, field: &'static str, required: bool, consumed: bool) -> RequirementGroup {
    RequirementGroup {
        label,
        field,
        required,
        consumed,
    }
}

const PROTOTYPE_GROUPS: [RequirementGroup; 6] = [
    group("Required Materials", "skillMaterialsRequired", true, true),
    group("Required Materials", "prototypeItemsConsumed", true, true),
    group("Optional Materials", "skillMaterialsOptional", false, true),
    group("Required Tools/Equipment", "skillToolsRequired", true, false),
    group("Required Tools/Equipment", "prototypeItemsRequired", true, false),
    group("Optional Tools/Equipment", "skillToolsOptional", false, false),
];

const CRAFT_GROUPS: [RequirementGroup; 4] = [
    group("Required Materials", "skillMaterialsRequired", true, true),
    group("Optional Materials", "skillMaterialsOptional", false, true),
    group("Required Tools/Equipment", "skillToolsRequired", true, false),
    group("Optional Tools/Equipment", "skillToolsOptional", false, false),
];

const ACTOR_CHECKS: CheckSet = CheckSet::ALL;

/// Static description of one operation kind.
#[derive(Debug)]
pub struct KindSpec {
    pub kind: OperationKind,
    /// Verb used in precondition messages ("You cannot {verb} right now.").
    pub verb: &'static str,
    /// Request parameter holding the subject id.
    pub subject_param: &'static str,
    pub subject_kind: EntityKind,
    pub checks: CheckSet,
    pub groups: &'static [RequirementGroup],
    /// Schema version of [`ConstructionPayload`] written by this kind.
    pub payload_version: u32,
    invalid_subject: &'static str,
    foreign_subject: &'static str,
}

static PROTOTYPE: KindSpec = KindSpec {
    kind: OperationKind::Prototype,
    verb: "experiment",
    subject_param: "ideaId",
    subject_kind: EntityKind::Idea,
    checks: ACTOR_CHECKS,
    groups: &PROTOTYPE_GROUPS,
    payload_version: 1,
    invalid_subject: "Invalid idea specified.",
    foreign_subject: "The idea you tried to turn into a prototype is stored in another character's brain. Nice try.",
};

static CRAFT: KindSpec = KindSpec {
    kind: OperationKind::Craft,
    verb: "craft",
    subject_param: "skillId",
    subject_kind: EntityKind::Skill,
    checks: ACTOR_CHECKS,
    groups: &CRAFT_GROUPS,
    payload_version: 1,
    invalid_subject: "Invalid skill specified.",
    foreign_subject: "You don't know that skill.",
};

/// Subject fields shared by ideas and skills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubjectRef {
    pub owner: EntityKey,
    pub definition: EntityKey,
}

/// What a completion writes, minus the operation transition.
#[derive(Debug)]
pub struct Effect {
    pub changes: ChangeSet,
    /// Player-facing message.
    pub message: String,
    /// Short result line.
    pub result: String,
    pub created: Vec<EntityKey>,
}

/// Inputs to an effect, all read from one pool pass.
pub struct EffectInput<'a> {
    pub actor: &'a Entity,
    pub subject: &'a Entity,
    pub definition: &'a Entity,
    pub payload: &'a ConstructionPayload,
    /// Entities bound by the selection, keyed by their key.
    pub bound: &'a BTreeMap<EntityKey, &'a Entity>,
}

impl KindSpec {
    #[must_use]
    pub fn of(kind: OperationKind) -> &'static Self {
        match kind {
            OperationKind::Prototype => &PROTOTYPE,
            OperationKind::Craft => &CRAFT,
        }
    }

    /// Rejection for a subject that does not exist or is not of this kind's
    /// subject type.
    #[must_use]
    pub fn invalid_subject(&self) -> UserError {
        UserError::PreconditionFailed {
            check: Check::SubjectOwner,
            message: self.invalid_subject.to_string(),
        }
    }

    /// Owner and definition of a subject entity, if it has the right type.
    #[must_use]
    pub fn subject_ref(&self, subject: &Entity) -> Option<SubjectRef> {
        match self.kind {
            OperationKind::Prototype => subject.as_idea().map(|i| SubjectRef {
                owner: i.owner,
                definition: i.definition,
            }),
            OperationKind::Craft => subject.as_skill().map(|s| SubjectRef {
                owner: s.owner,
                definition: s.definition,
            }),
        }
    }

    /// Subject-level precondition, run after the actor checks.
    ///
    /// # Errors
    /// `PreconditionFailed` if the subject belongs to another character.
    pub fn check_subject(&self, actor: EntityKey, subject: &SubjectRef) -> Result<(), UserError> {
        if subject.owner == actor {
            Ok(())
        } else {
            Err(UserError::PreconditionFailed {
                check: Check::SubjectOwner,
                message: self.foreign_subject.to_string(),
            })
        }
    }

    /// Duration the definition configures for this kind, if any.
    #[must_use]
    pub const fn configured_secs(&self, definition: &IdeaDefinition) -> Option<u64> {
        match self.kind {
            OperationKind::Prototype => definition.prototype_construction_secs,
            OperationKind::Craft => definition.construction_secs,
        }
    }

    /// Countdown text stored on the operation.
    #[must_use]
    pub fn description(&self, secs: u64, definition: &IdeaDefinition) -> String {
        match self.kind {
            OperationKind::Prototype => format!("It will take {secs} seconds to finish this prototype."),
            OperationKind::Craft => format!(
                "It will take {secs} seconds to finish this {}.",
                definition.item_name
            ),
        }
    }

    /// Builds the completion writes.
    ///
    /// Updates and deletes carry the versions the inputs were read at, and
    /// every other read entity is guarded, so the commit fails as a whole if
    /// anything changed since.
    pub fn effect(&self, input: &EffectInput<'_>, store: &dyn Datastore) -> LongOpResult<Effect> {
        let definition = input
            .definition
            .as_idea_definition()
            .ok_or_else(|| LongOpError::internal(format!("{} is not a definition", input.definition.key)))?;
        let mut changes = ChangeSet::new();
        changes.guard(input.definition);
        consume_bound(&mut changes, input)?;

        let product_id = store.allocate_id(EntityKind::Item)?;
        let product = Entity::item(
            product_id,
            Item::new(definition.item_name.clone(), definition.item_type.clone()).owned_by(input.actor.key),
        );
        let mut created = vec![product.key];
        changes.insert(product);

        let mut actor = input.actor.clone();
        let character = actor
            .as_character_mut()
            .ok_or_else(|| LongOpError::internal(format!("{} is not a character", input.actor.key)))?;

        let (message, result) = match self.kind {
            OperationKind::Prototype => {
                let skill_id = store.allocate_id(EntityKind::Skill)?;
                let skill = Entity::skill(
                    skill_id,
                    Skill {
                        name: definition.name.clone(),
                        owner: input.actor.key,
                        definition: input.definition.key,
                    },
                );
                created.push(skill.key);
                changes.insert(skill);
                changes.delete(input.subject);

                character.increase_knowledge(&format!("idea:{}", definition.name), 2);
                character.increase_knowledge(&format!("item:{}", definition.item_type), 1);
                (
                    format!(
                        "You have a new skill! You successfully turned your idea of {} into a skill. \
                         A prototype of your skill is now in your inventory. You created an item: {}.",
                        input.payload.subject_name, definition.item_name
                    ),
                    "Experimentation complete.".to_string(),
                )
            }
            OperationKind::Craft => {
                changes.guard(input.subject);
                character.increase_knowledge(&format!("skill:{}", definition.name), 1);
                (
                    format!("You created an item: {}.", definition.item_name),
                    "Construction complete.".to_string(),
                )
            }
        };
        changes.update(actor);

        Ok(Effect {
            changes,
            message,
            result,
            created,
        })
    }
}

/// Deducts consumed quantities and guards bound tools.
fn consume_bound(changes: &mut ChangeSet, input: &EffectInput<'_>) -> LongOpResult<()> {
    let mut consumed: BTreeMap<EntityKey, u64> = BTreeMap::new();
    let mut used: BTreeSet<EntityKey> = BTreeSet::new();
    for slot in &input.payload.slots {
        let Some(chosen) = input.payload.selection.chosen(&slot.requirement) else {
            continue;
        };
        if slot.consumed {
            *consumed.entry(chosen).or_default() += slot.quantity;
        } else {
            used.insert(chosen);
        }
    }

    for (key, amount) in &consumed {
        let entity = bound(input, key)?;
        let item = entity
            .as_item()
            .ok_or_else(|| LongOpError::internal(format!("{key} is bound but not an item")))?;
        if item.quantity <= *amount {
            changes.delete(entity);
        } else {
            let mut remaining = entity.clone();
            if let Some(item) = remaining.as_item_mut() {
                item.quantity -= amount;
            }
            changes.update(remaining);
        }
    }
    for key in used.iter().filter(|k| !consumed.contains_key(*k)) {
        changes.guard(bound(input, key)?);
    }
    Ok(())
}

fn bound<'a>(input: &EffectInput<'a>, key: &EntityKey) -> LongOpResult<&'a Entity> {
    input
        .bound
        .get(key)
        .copied()
        .ok_or_else(|| LongOpError::internal(format!("bound entity {key} was not loaded")))
}
