//! Transient entity cache for one resolution pass.
//!
//! Callers register entities they already hold with [`EntityPool::add`],
//! queue the keys they still need with [`EntityPool::enqueue`], and then pay
//! for exactly one batched store fetch per [`EntityPool::load`], however many
//! requirement slots the pass touches.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::entity::{Entity, EntityKey, EntityKind};
use crate::storage::{Datastore, StorageError};

/// Errors from loading a pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Some enqueued keys do not exist. Everything else was loaded.
    #[error("{} entities not found: {}", .keys.len(), format_keys(.keys))]
    NotFound {
        keys: Vec<EntityKey>,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn format_keys(keys: &[EntityKey]) -> String {
    keys.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

impl PoolError {
    /// Keys reported missing, empty for storage failures.
    #[must_use]
    pub fn missing(&self) -> &[EntityKey] {
        match self {
            Self::NotFound { keys } => keys,
            Self::Storage(_) => &[],
        }
    }
}

/// Batch-loading entity cache, iterated in key order.
pub struct EntityPool<'a> {
    store: &'a dyn Datastore,
    entities: BTreeMap<EntityKey, Entity>,
    queue: BTreeSet<EntityKey>,
    fetches: usize,
}

impl<'a> EntityPool<'a> {
    #[must_use]
    pub fn new(store: &'a dyn Datastore) -> Self {
        Self {
            store,
            entities: BTreeMap::new(),
            queue: BTreeSet::new(),
            fetches: 0,
        }
    }

    /// Register an entity that is already available. Replaces any cached copy.
    pub fn add(&mut self, entity: Entity) {
        self.queue.remove(&entity.key);
        self.entities.insert(entity.key, entity);
    }

    /// Mark keys for the next batched load. Already cached keys are skipped.
    pub fn enqueue<I>(&mut self, keys: I)
    where
        I: IntoIterator<Item = EntityKey>,
    {
        for key in keys {
            if !self.entities.contains_key(&key) {
                self.queue.insert(key);
            }
        }
    }

    /// Fetch all queued keys in one batch.
    ///
    /// Found entities are cached even when some keys are missing; missing
    /// keys are reported together in [`PoolError::NotFound`]. No fetch is made
    /// when nothing is queued.
    pub fn load(&mut self) -> Result<(), PoolError> {
        if self.queue.is_empty() {
            return Ok(());
        }
        let keys: Vec<EntityKey> = std::mem::take(&mut self.queue).into_iter().collect();
        self.fetches += 1;
        let found = self.store.get_many(&keys)?;
        for entity in found {
            self.entities.insert(entity.key, entity);
        }
        let missing: Vec<EntityKey> = keys
            .into_iter()
            .filter(|k| !self.entities.contains_key(k))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PoolError::NotFound { keys: missing })
        }
    }

    #[must_use]
    pub fn get(&self, key: &EntityKey) -> Option<&Entity> {
        self.entities.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entities.contains_key(key)
    }

    /// Cached entities of one kind, in id order.
    pub fn of_kind(&self, kind: EntityKind) -> impl Iterator<Item = &Entity> {
        self.entities
            .range(EntityKey::new(kind, 0)..=EntityKey::new(kind, u64::MAX))
            .map(|(_, e)| e)
    }

    /// Cached items held by `owner`, in id order.
    pub fn items_owned_by(&self, owner: EntityKey) -> impl Iterator<Item = &Entity> {
        self.of_kind(EntityKind::Item)
            .filter(move |e| e.as_item().is_some_and(|item| item.owner == Some(owner)))
    }

    /// Number of batched fetches performed so far.
    #[must_use]
    pub const fn fetches(&self) -> usize {
        self.fetches
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Character, Item};
    use crate::storage::InMemoryDatastore;

    fn store() -> InMemoryDatastore {
        let ada = EntityKey::character(1);
        InMemoryDatastore::with_entities([
            Entity::character(1, Character::new("Ada")),
            Entity::item(7, Item::new("Oak log", "material/wood").owned_by(ada)),
            Entity::item(3, Item::new("Hammer", "tool/hammer").owned_by(ada)),
            Entity::item(5, Item::new("Stone", "material/stone")),
        ])
        .unwrap()
    }

    #[test]
    fn test_load_is_one_batch() {
        let store = store();
        let mut pool = EntityPool::new(&store);
        pool.enqueue([EntityKey::item(7), EntityKey::item(3)]);
        pool.enqueue([EntityKey::character(1), EntityKey::item(7)]);
        pool.load().unwrap();
        assert_eq!(pool.fetches(), 1);
        assert_eq!(store.stats().batch_gets(), 1);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_load_without_queue_does_not_fetch() {
        let store = store();
        let mut pool = EntityPool::new(&store);
        pool.load().unwrap();
        assert_eq!(pool.fetches(), 0);
        assert_eq!(store.stats().batch_gets(), 0);
    }

    #[test]
    fn test_cached_keys_are_not_refetched() {
        let store = store();
        let mut pool = EntityPool::new(&store);
        pool.add(Entity::character(1, Character::new("Ada")));
        pool.enqueue([EntityKey::character(1)]);
        pool.load().unwrap();
        assert_eq!(pool.fetches(), 0);
    }

    #[test]
    fn test_missing_keys_are_collected() {
        let store = store();
        let mut pool = EntityPool::new(&store);
        pool.enqueue([EntityKey::item(404), EntityKey::item(7), EntityKey::item(405)]);
        let err = pool.load().unwrap_err();
        assert_eq!(err.missing(), &[EntityKey::item(404), EntityKey::item(405)]);
        assert!(err.to_string().contains("item:404"));
        assert!(pool.get(&EntityKey::item(7)).is_some(), "found entities stay cached");
    }

    #[test]
    fn test_items_owned_by_iterates_in_id_order() {
        let store = store();
        let mut pool = EntityPool::new(&store);
        pool.enqueue([EntityKey::item(7), EntityKey::item(5), EntityKey::item(3), EntityKey::character(1)]);
        pool.load().unwrap();
        let ids: Vec<u64> = pool
            .items_owned_by(EntityKey::character(1))
            .map(|e| e.key.id)
            .collect();
        assert_eq!(ids, vec![3, 7]);
        assert_eq!(pool.of_kind(EntityKind::Character).count(), 1);
    }
}
