//! Requirement slot resolution.
//!
//! A definition lists generic entity requirements under named candidate-source
//! fields (`skillMaterialsRequired`, `skillToolsOptional`, ...). Expansion
//! turns those lists into ordered [`RequirementSlot`]s; resolution binds each
//! slot to one of the actor's items.
//!
//! Binding is deterministic. Slots are processed in expansion order, and
//! each picks, among items with enough quantity left after earlier slots
//! took their share, an exact type match over a subtype match and then the
//! lowest item id. The pool iterates in key order, so no hash-map ordering
//! leaks into the result.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::entity::{EntityKey, IdeaDefinition, TypeMatch, TypePath};
use crate::error::{LongOpError, LongOpResult, UserError};
use crate::pool::EntityPool;

/// One candidate-source field of a definition and how its slots behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequirementGroup {
    /// Display label, e.g. "Required Materials".
    pub label: &'static str,
    /// Field on the definition listing requirement keys.
    pub field: &'static str,
    pub required: bool,
    /// Whether bound items are used up by the effect (materials) or only
    /// needed (tools).
    pub consumed: bool,
}

/// An expanded requirement instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementSlot {
    pub requirement: EntityKey,
    pub name: String,
    pub label: String,
    pub field: String,
    pub required: bool,
    pub consumed: bool,
    pub accepted_types: Vec<TypePath>,
    pub quantity: u64,
}

/// A client-chosen entity for one slot. `chosen: None` asks for the
/// automatic choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSelection {
    pub slot: EntityKey,
    pub chosen: Option<EntityKey>,
}

/// Slot → chosen entity (or none for an unused optional slot).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<SlotSelection>", into = "Vec<SlotSelection>")]
pub struct ResolvedSelection {
    bindings: BTreeMap<EntityKey, Option<EntityKey>>,
}

impl ResolvedSelection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, slot: EntityKey, chosen: Option<EntityKey>) {
        self.bindings.insert(slot, chosen);
    }

    /// `None` if the slot was never resolved; `Some(None)` if it resolved
    /// to nothing.
    #[must_use]
    pub fn get(&self, slot: &EntityKey) -> Option<Option<EntityKey>> {
        self.bindings.get(slot).copied()
    }

    /// The entity chosen for a slot, if any.
    #[must_use]
    pub fn chosen(&self, slot: &EntityKey) -> Option<EntityKey> {
        self.get(slot).flatten()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityKey, &Option<EntityKey>)> {
        self.bindings.iter()
    }

    /// Distinct entities bound to any slot.
    #[must_use]
    pub fn entities(&self) -> BTreeSet<EntityKey> {
        self.bindings.values().filter_map(|v| *v).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl From<Vec<SlotSelection>> for ResolvedSelection {
    fn from(list: Vec<SlotSelection>) -> Self {
        Self {
            bindings: list.into_iter().map(|s| (s.slot, s.chosen)).collect(),
        }
    }
}

impl From<ResolvedSelection> for Vec<SlotSelection> {
    fn from(selection: ResolvedSelection) -> Self {
        selection
            .bindings
            .into_iter()
            .map(|(slot, chosen)| SlotSelection { slot, chosen })
            .collect()
    }
}

/// Expands the definition's candidate-source fields into slots, in group
/// order. A requirement listed more than once is expanded only the first
/// time. Requirement entities must already be in the pool.
pub fn expand_slots(
    definition: &IdeaDefinition,
    groups: &[RequirementGroup],
    pool: &EntityPool<'_>,
) -> LongOpResult<Vec<RequirementSlot>> {
    let mut seen = BTreeSet::new();
    let mut slots = Vec::new();
    for group in groups {
        for key in definition.field(group.field) {
            if !seen.insert(*key) {
                continue;
            }
            let requirement = pool
                .get(key)
                .and_then(|e| e.as_requirement())
                .ok_or_else(|| {
                    LongOpError::internal(format!(
                        "definition '{}' lists {key} under {} but it is not a loaded requirement",
                        definition.name, group.field
                    ))
                })?;
            slots.push(RequirementSlot {
                requirement: *key,
                name: requirement.name.clone(),
                label: group.label.to_string(),
                field: group.field.to_string(),
                required: group.required,
                consumed: group.consumed,
                accepted_types: requirement.accepted_types.clone(),
                quantity: requirement.quantity.max(1),
            });
        }
    }
    Ok(slots)
}

/// Every requirement key the groups reference, for pool loading.
#[must_use]
pub fn requirement_keys(definition: &IdeaDefinition, groups: &[RequirementGroup]) -> Vec<EntityKey> {
    groups
        .iter()
        .flat_map(|g| definition.field(g.field).iter().copied())
        .collect()
}

/// Stable digest of a slot layout.
///
/// Stored alongside the selection at begin time; a different digest at
/// completion means the definition changed underneath the operation.
pub fn fingerprint(slots: &[RequirementSlot]) -> LongOpResult<String> {
    let bytes = serde_json::to_vec(slots)
        .map_err(|e| LongOpError::internal(format!("serialize slots for fingerprint: {e}")))?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

/// Quantities already committed to slots in the current pass.
#[derive(Debug, Default)]
struct Ledger {
    committed: BTreeMap<EntityKey, u64>,
}

impl Ledger {
    fn committed(&self, key: &EntityKey) -> u64 {
        self.committed.get(key).copied().unwrap_or(0)
    }

    fn commit(&mut self, key: EntityKey, quantity: u64) {
        *self.committed.entry(key).or_default() += quantity;
    }
}

/// Binds requirement slots to items from one actor's pooled inventory.
pub struct RequirementSlotResolver<'p, 'a> {
    pool: &'p EntityPool<'a>,
    actor: EntityKey,
}

impl<'p, 'a> RequirementSlotResolver<'p, 'a> {
    #[must_use]
    pub const fn new(pool: &'p EntityPool<'a>, actor: EntityKey) -> Self {
        Self { pool, actor }
    }

    /// Automatic resolution.
    ///
    /// # Errors
    /// `UnsatisfiedRequirement` for the first required slot with no candidate.
    pub fn resolve(&self, slots: &[RequirementSlot]) -> Result<ResolvedSelection, UserError> {
        let mut ledger = Ledger::default();
        let mut selection = ResolvedSelection::new();
        for slot in slots {
            let chosen = self.bind_automatic(slot, &mut ledger)?;
            selection.bind(slot.requirement, chosen);
        }
        Ok(selection)
    }

    /// Applies client overrides on top of an automatic resolution.
    ///
    /// Pinned entities are checked against their slot first; the remaining
    /// slots keep their automatic choice while it still fits, otherwise they
    /// are re-resolved.
    ///
    /// # Errors
    /// - `InvalidSelection`: an override names an unknown slot, a slot twice,
    ///   or an entity that does not satisfy its slot
    /// - `UnsatisfiedRequirement`: pins left a required slot without candidates
    pub fn reconcile(
        &self,
        slots: &[RequirementSlot],
        resolved: &ResolvedSelection,
        overrides: &[SlotSelection],
    ) -> Result<ResolvedSelection, UserError> {
        let mut pins: BTreeMap<EntityKey, EntityKey> = BTreeMap::new();
        for selection in overrides {
            let Some(slot) = slots.iter().find(|s| s.requirement == selection.slot) else {
                return Err(UserError::InvalidSelection {
                    slot: selection.slot.to_string(),
                    reason: "it is not a requirement of this operation".to_string(),
                });
            };
            let Some(chosen) = selection.chosen else {
                continue;
            };
            if pins.insert(slot.requirement, chosen).is_some() {
                return Err(UserError::InvalidSelection {
                    slot: slot.name.clone(),
                    reason: "more than one item was selected".to_string(),
                });
            }
        }
        let mut ledger = Ledger::default();
        let mut selection = ResolvedSelection::new();
        for slot in slots {
            if let Some(pinned) = pins.get(&slot.requirement) {
                self.check(slot, *pinned, &ledger)
                    .map_err(|reason| UserError::InvalidSelection {
                        slot: slot.name.clone(),
                        reason,
                    })?;
                ledger.commit(*pinned, slot.quantity);
                selection.bind(slot.requirement, Some(*pinned));
            }
        }
        for slot in slots {
            if pins.contains_key(&slot.requirement) {
                continue;
            }
            let kept = resolved
                .chosen(&slot.requirement)
                .filter(|prior| self.check(slot, *prior, &ledger).is_ok());
            let chosen = match kept {
                Some(prior) => {
                    ledger.commit(prior, slot.quantity);
                    Some(prior)
                }
                None => self.bind_automatic(slot, &mut ledger)?,
            };
            selection.bind(slot.requirement, chosen);
        }
        Ok(selection)
    }

    /// Re-checks a stored selection against the current pool.
    ///
    /// # Errors
    /// `ResolutionStale` naming the first slot whose binding no longer holds.
    pub fn verify(
        &self,
        slots: &[RequirementSlot],
        resolved: &ResolvedSelection,
    ) -> Result<(), UserError> {
        let mut ledger = Ledger::default();
        for slot in slots {
            let stale = |reason: &str| UserError::ResolutionStale {
                slot: slot.name.clone(),
                reason: reason.to_string(),
            };
            match resolved.get(&slot.requirement) {
                None => return Err(stale("no selection was recorded")),
                Some(None) if slot.required => return Err(stale("nothing was selected")),
                Some(None) => {}
                Some(Some(chosen)) => {
                    self.check(slot, chosen, &ledger)
                        .map_err(|reason| stale(&reason))?;
                    ledger.commit(chosen, slot.quantity);
                }
            }
        }
        let known: BTreeSet<EntityKey> = slots.iter().map(|s| s.requirement).collect();
        if let Some((extra, _)) = resolved.iter().find(|(slot, _)| !known.contains(*slot)) {
            return Err(UserError::ResolutionStale {
                slot: extra.to_string(),
                reason: "the requirement no longer exists".to_string(),
            });
        }
        Ok(())
    }

    fn bind_automatic(
        &self,
        slot: &RequirementSlot,
        ledger: &mut Ledger,
    ) -> Result<Option<EntityKey>, UserError> {
        match self.best_candidate(slot, ledger) {
            Some(key) => {
                ledger.commit(key, slot.quantity);
                Ok(Some(key))
            }
            None if slot.required => Err(UserError::UnsatisfiedRequirement {
                requirement: slot.requirement,
                slot: slot.name.clone(),
                label: slot.label.clone(),
            }),
            None => Ok(None),
        }
    }

    fn best_candidate(&self, slot: &RequirementSlot, ledger: &Ledger) -> Option<EntityKey> {
        self.pool
            .items_owned_by(self.actor)
            .filter_map(|entity| {
                let item = entity.as_item()?;
                let quality: TypeMatch = item.item_type.best_match(&slot.accepted_types)?;
                let remaining = item.quantity.saturating_sub(ledger.committed(&entity.key));
                (remaining >= slot.quantity).then_some((quality, entity.key))
            })
            .min()
            .map(|(_, key)| key)
    }

    /// Why `candidate` cannot fill `slot`, if it cannot.
    fn check(&self, slot: &RequirementSlot, candidate: EntityKey, ledger: &Ledger) -> Result<(), String> {
        let entity = self
            .pool
            .get(&candidate)
            .ok_or_else(|| format!("{candidate} no longer exists"))?;
        let item = entity
            .as_item()
            .ok_or_else(|| format!("{candidate} is not an item"))?;
        if item.owner != Some(self.actor) {
            return Err(format!("{} is not in your inventory", item.name));
        }
        if item.item_type.best_match(&slot.accepted_types).is_none() {
            let accepted = slot
                .accepted_types
                .iter()
                .map(TypePath::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(format!(
                "{} is a {} but this needs {accepted}",
                item.name, item.item_type
            ));
        }
        let remaining = item.quantity.saturating_sub(ledger.committed(&candidate));
        if remaining < slot.quantity {
            return Err(format!(
                "{} has {remaining} left but {} are needed",
                item.name, slot.quantity
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, GenericEntityRequirement, Item};
    use crate::storage::{Datastore, InMemoryDatastore};

    const ACTOR: EntityKey = EntityKey::character(1);

    fn slot(id: u64, name: &str, accepted: &[&str], quantity: u64, required: bool) -> RequirementSlot {
        RequirementSlot {
            requirement: EntityKey::requirement(id),
            name: name.to_string(),
            label: if required { "Required Materials" } else { "Optional Materials" }.to_string(),
            field: "skillMaterialsRequired".to_string(),
            required,
            consumed: true,
            accepted_types: accepted.iter().map(|t| TypePath::new(t)).collect(),
            quantity,
        }
    }

    fn item(id: u64, name: &str, ty: &str, quantity: u64) -> Entity {
        Entity::item(id, Item::new(name, ty).owned_by(ACTOR).with_quantity(quantity))
    }

    fn pooled(store: &InMemoryDatastore) -> EntityPool<'_> {
        let mut pool = EntityPool::new(store);
        for entity in store.items_owned_by(ACTOR).unwrap() {
            pool.add(entity);
        }
        pool
    }

    #[test]
    fn test_prefers_exact_then_lowest_id() {
        let store = InMemoryDatastore::with_entities([
            item(12, "Claw hammer", "tool/hammer/claw", 1),
            item(20, "Hammer B", "tool/hammer", 1),
            item(15, "Hammer A", "tool/hammer", 1),
        ])
        .unwrap();
        let pool = pooled(&store);
        let resolver = RequirementSlotResolver::new(&pool, ACTOR);

        let selection = resolver.resolve(&[slot(1, "Hammer", &["tool/hammer"], 1, true)]).unwrap();
        assert_eq!(selection.chosen(&EntityKey::requirement(1)), Some(EntityKey::item(15)));
    }

    #[test]
    fn test_subtype_used_when_no_exact_match() {
        let store = InMemoryDatastore::with_entities([item(12, "Claw hammer", "tool/hammer/claw", 1)]).unwrap();
        let pool = pooled(&store);
        let selection = RequirementSlotResolver::new(&pool, ACTOR)
            .resolve(&[slot(1, "Hammer", &["tool/hammer"], 1, true)])
            .unwrap();
        assert_eq!(selection.chosen(&EntityKey::requirement(1)), Some(EntityKey::item(12)));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let store = InMemoryDatastore::with_entities([
            item(4, "Pine", "material/wood/pine", 5),
            item(2, "Oak", "material/wood/oak", 5),
            item(9, "Plank", "material/wood", 2),
        ])
        .unwrap();
        let slots = vec![
            slot(1, "Wood", &["material/wood"], 2, true),
            slot(2, "More wood", &["material/wood"], 3, true),
        ];
        let first = RequirementSlotResolver::new(&pooled(&store), ACTOR).resolve(&slots).unwrap();
        for _ in 0..10 {
            let again = RequirementSlotResolver::new(&pooled(&store), ACTOR).resolve(&slots).unwrap();
            assert_eq!(again, first);
        }
        assert_eq!(first.chosen(&EntityKey::requirement(1)), Some(EntityKey::item(9)));
        assert_eq!(first.chosen(&EntityKey::requirement(2)), Some(EntityKey::item(2)));
    }

    #[test]
    fn test_quantities_are_shared_across_slots() {
        let store = InMemoryDatastore::with_entities([item(3, "Nails", "material/nail", 5)]).unwrap();
        let pool = pooled(&store);
        let resolver = RequirementSlotResolver::new(&pool, ACTOR);

        let ok = resolver
            .resolve(&[slot(1, "Nails", &["material/nail"], 3, true), slot(2, "More nails", &["material/nail"], 2, true)])
            .unwrap();
        assert_eq!(ok.entities().len(), 1);

        let err = resolver
            .resolve(&[slot(1, "Nails", &["material/nail"], 3, true), slot(2, "More nails", &["material/nail"], 3, true)])
            .unwrap_err();
        assert!(matches!(err, UserError::UnsatisfiedRequirement { ref slot, .. } if slot == "More nails"));
    }

    #[test]
    fn test_optional_slot_without_candidate_resolves_to_none() {
        let store = InMemoryDatastore::with_entities([item(3, "Oak", "material/wood", 1)]).unwrap();
        let pool = pooled(&store);
        let selection = RequirementSlotResolver::new(&pool, ACTOR)
            .resolve(&[slot(1, "Wood", &["material/wood"], 1, true), slot(2, "Gem", &["material/gem"], 1, false)])
            .unwrap();
        assert_eq!(selection.get(&EntityKey::requirement(2)), Some(None));
        assert_eq!(selection.len(), 2);
    }

    #[test]
    fn test_items_of_other_owners_are_ignored() {
        let store = InMemoryDatastore::with_entities([Entity::item(
            3,
            Item::new("Oak", "material/wood").owned_by(EntityKey::character(2)),
        )])
        .unwrap();
        let mut pool = EntityPool::new(&store);
        pool.enqueue([EntityKey::item(3)]);
        pool.load().unwrap();
        let err = RequirementSlotResolver::new(&pool, ACTOR)
            .resolve(&[slot(1, "Wood", &["material/wood"], 1, true)])
            .unwrap_err();
        assert!(matches!(err, UserError::UnsatisfiedRequirement { .. }));
    }

    #[test]
    fn test_reconcile_pins_override_and_reshuffles_rest() {
        let store = InMemoryDatastore::with_entities([
            item(2, "Oak", "material/wood", 1),
            item(5, "Pine", "material/wood", 1),
        ])
        .unwrap();
        let pool = pooled(&store);
        let resolver = RequirementSlotResolver::new(&pool, ACTOR);
        let slots = vec![
            slot(1, "Wood", &["material/wood"], 1, true),
            slot(2, "Second wood", &["material/wood"], 1, true),
        ];
        let auto = resolver.resolve(&slots).unwrap();
        assert_eq!(auto.chosen(&EntityKey::requirement(1)), Some(EntityKey::item(2)));

        let overrides = [SlotSelection {
            slot: EntityKey::requirement(1),
            chosen: Some(EntityKey::item(5)),
        }];
        let reconciled = resolver.reconcile(&slots, &auto, &overrides).unwrap();
        assert_eq!(reconciled.chosen(&EntityKey::requirement(1)), Some(EntityKey::item(5)));
        assert_eq!(reconciled.chosen(&EntityKey::requirement(2)), Some(EntityKey::item(2)));
    }

    #[test]
    fn test_reconcile_rejects_wrong_category() {
        let store = InMemoryDatastore::with_entities([
            item(7, "Hammer", "tool/hammer", 1),
            item(9, "Oak", "material/wood", 1),
        ])
        .unwrap();
        let pool = pooled(&store);
        let resolver = RequirementSlotResolver::new(&pool, ACTOR);
        let slots = vec![slot(1, "Hammer", &["tool"], 1, true)];
        let auto = resolver.resolve(&slots).unwrap();

        let err = resolver
            .reconcile(
                &slots,
                &auto,
                &[SlotSelection {
                    slot: EntityKey::requirement(1),
                    chosen: Some(EntityKey::item(9)),
                }],
            )
            .unwrap_err();
        assert!(matches!(err, UserError::InvalidSelection { .. }));
    }

    #[test]
    fn test_reconcile_rejects_unknown_slot_and_keeps_automatic_on_empty() {
        let store = InMemoryDatastore::with_entities([item(7, "Hammer", "tool/hammer", 1)]).unwrap();
        let pool = pooled(&store);
        let resolver = RequirementSlotResolver::new(&pool, ACTOR);
        let slots = vec![slot(1, "Hammer", &["tool"], 1, true)];
        let auto = resolver.resolve(&slots).unwrap();

        let unknown = [SlotSelection {
            slot: EntityKey::requirement(99),
            chosen: Some(EntityKey::item(7)),
        }];
        assert!(matches!(
            resolver.reconcile(&slots, &auto, &unknown).unwrap_err(),
            UserError::InvalidSelection { .. }
        ));

        let automatic = [SlotSelection {
            slot: EntityKey::requirement(1),
            chosen: None,
        }];
        assert_eq!(resolver.reconcile(&slots, &auto, &automatic).unwrap(), auto);
    }

    #[test]
    fn test_reconcile_without_pins_still_reports_missing_candidates() {
        let store = InMemoryDatastore::with_entities([item(9, "Oak", "material/wood", 1)]).unwrap();
        let pool = pooled(&store);
        let resolver = RequirementSlotResolver::new(&pool, ACTOR);
        let slots = vec![slot(1, "Hammer", &["tool"], 1, true)];

        let automatic = [SlotSelection {
            slot: EntityKey::requirement(1),
            chosen: None,
        }];
        let err = resolver
            .reconcile(&slots, &ResolvedSelection::new(), &automatic)
            .unwrap_err();
        assert!(matches!(err, UserError::UnsatisfiedRequirement { ref slot, .. } if slot == "Hammer"));
    }

    #[test]
    fn test_verify_detects_removed_item() {
        let store = InMemoryDatastore::with_entities([item(7, "Oak", "material/wood", 1)]).unwrap();
        let slots = vec![slot(1, "Wood", &["material/wood"], 1, true)];
        let selection = RequirementSlotResolver::new(&pooled(&store), ACTOR).resolve(&slots).unwrap();

        RequirementSlotResolver::new(&pooled(&store), ACTOR)
            .verify(&slots, &selection)
            .unwrap();

        store.remove(EntityKey::item(7)).unwrap();
        let err = RequirementSlotResolver::new(&pooled(&store), ACTOR)
            .verify(&slots, &selection)
            .unwrap_err();
        assert!(matches!(err, UserError::ResolutionStale { ref slot, .. } if slot == "Wood"));
    }

    #[test]
    fn test_verify_sums_quantities_bound_to_one_item() {
        let store = InMemoryDatastore::with_entities([item(3, "Nails", "material/nail", 5)]).unwrap();
        let slots = vec![
            slot(1, "Nails", &["material/nail"], 3, true),
            slot(2, "More nails", &["material/nail"], 2, true),
        ];
        let selection = RequirementSlotResolver::new(&pooled(&store), ACTOR).resolve(&slots).unwrap();

        let mut fewer = store.get(EntityKey::item(3)).unwrap().unwrap();
        fewer.as_item_mut().unwrap().quantity = 4;
        store.replace(fewer).unwrap();

        let err = RequirementSlotResolver::new(&pooled(&store), ACTOR)
            .verify(&slots, &selection)
            .unwrap_err();
        assert!(matches!(err, UserError::ResolutionStale { ref slot, .. } if slot == "More nails"));
    }

    #[test]
    fn test_verify_detects_retyped_item() {
        let store = InMemoryDatastore::with_entities([item(7, "Hammer", "tool/hammer", 1)]).unwrap();
        let slots = vec![slot(1, "Hammer", &["tool"], 1, true)];
        let selection = RequirementSlotResolver::new(&pooled(&store), ACTOR).resolve(&slots).unwrap();

        let mut retyped = store.get(EntityKey::item(7)).unwrap().unwrap();
        retyped.as_item_mut().unwrap().item_type = TypePath::new("material/wood");
        store.replace(retyped).unwrap();

        let err = RequirementSlotResolver::new(&pooled(&store), ACTOR)
            .verify(&slots, &selection)
            .unwrap_err();
        assert!(matches!(
            err,
            UserError::ResolutionStale { ref slot, ref reason }
                if slot == "Hammer" && reason.contains("is a material/wood but this needs tool")
        ));
    }

    #[test]
    fn test_expand_slots_in_group_order_without_duplicates() {
        let store = InMemoryDatastore::with_entities([
            Entity::requirement(
                1,
                GenericEntityRequirement {
                    name: "Wood".to_string(),
                    accepted_types: vec![TypePath::new("material/wood")],
                    quantity: 2,
                },
            ),
            Entity::requirement(
                2,
                GenericEntityRequirement {
                    name: "Hammer".to_string(),
                    accepted_types: vec![TypePath::new("tool/hammer")],
                    quantity: 1,
                },
            ),
        ])
        .unwrap();
        let mut definition = IdeaDefinition {
            name: "Bow".to_string(),
            item_name: "Bow".to_string(),
            item_type: TypePath::new("weapon/bow"),
            prototype_construction_secs: None,
            construction_secs: None,
            requirements: BTreeMap::new(),
        };
        definition
            .requirements
            .insert("skillToolsRequired".to_string(), vec![EntityKey::requirement(2)]);
        definition.requirements.insert(
            "skillMaterialsRequired".to_string(),
            vec![EntityKey::requirement(1), EntityKey::requirement(1)],
        );
        let groups = [
            RequirementGroup { label: "Required Materials", field: "skillMaterialsRequired", required: true, consumed: true },
            RequirementGroup { label: "Required Tools/Equipment", field: "skillToolsRequired", required: true, consumed: false },
        ];

        let mut pool = EntityPool::new(&store);
        pool.enqueue(requirement_keys(&definition, &groups));
        pool.load().unwrap();
        let slots = expand_slots(&definition, &groups, &pool).unwrap();

        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].name, "Wood");
        assert_eq!(slots[0].quantity, 2);
        assert!(slots[0].consumed);
        assert_eq!(slots[1].label, "Required Tools/Equipment");
        assert!(!slots[1].consumed);

        let digest = fingerprint(&slots).unwrap();
        assert_eq!(digest, fingerprint(&slots).unwrap());
        assert_ne!(digest, fingerprint(&slots[..1]).unwrap());
    }

    #[test]
    fn test_selection_serializes_as_list() {
        let mut selection = ResolvedSelection::new();
        selection.bind(EntityKey::requirement(1), Some(EntityKey::item(7)));
        selection.bind(EntityKey::requirement(2), None);
        let json = serde_json::to_value(&selection).unwrap();
        assert!(json.is_array());
        let back: ResolvedSelection = serde_json::from_value(json).unwrap();
        assert_eq!(back, selection);
    }
}
