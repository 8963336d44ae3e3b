//! Abstract storage traits for longops.
//!
//! [`Datastore`] is the boundary with the game's entity store. The operation
//! core needs very little from it: batched reads, an owner index for
//! inventory scans, an atomic claim on an actor's operation slot, and one
//! all-or-nothing commit for everything a completion writes.

use thiserror::Error;

use crate::entity::{Entity, EntityKey, EntityKind};
use crate::operation::{DeferredOperation, OperationId, Phase};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Entity not found.
    #[error("Entity not found: {0}")]
    EntityNotFound(EntityKey),

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Optimistic concurrency check failed.
    #[error("Version conflict on {key}: expected {expected}, found {actual:?}")]
    VersionConflict {
        key: EntityKey,
        expected: u64,
        actual: Option<u64>,
    },

    /// The actor already owns a non-terminal operation.
    #[error("Actor {actor} already has operation {operation}")]
    ActorBusy {
        actor: EntityKey,
        operation: OperationId,
    },

    /// No active operation with this id.
    #[error("Operation not found: {0}")]
    OperationNotFound(OperationId),

    /// The stored operation is not in the phase the writer expected.
    #[error("Operation {operation} is {actual}, expected {expected}")]
    PhaseConflict {
        operation: OperationId,
        expected: Phase,
        actual: Phase,
    },

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Guard on an entity that was read but is not written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct VersionGuard {
    pub key: EntityKey,
    pub version: u64,
}

/// Replacement of an active operation record.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OperationTransition {
    /// The stored phase the writer observed.
    pub expected_phase: Phase,
    /// The new record. A terminal phase archives it and frees the actor.
    pub operation: DeferredOperation,
}

/// A unit of work applied all-or-nothing by [`Datastore::commit`].
///
/// Every precondition (guards, update versions, delete versions, absent
/// inserts, operation phase) is checked before anything is written.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChangeSet {
    /// Entities read but not written; their versions must be unchanged.
    pub guards: Vec<VersionGuard>,
    /// New entities; keys must be unused.
    pub inserts: Vec<Entity>,
    /// Updated entities carrying the version they were read at. The store
    /// writes them at `version + 1`.
    pub updates: Vec<Entity>,
    /// Deleted entities with the version they were read at.
    pub deletes: Vec<VersionGuard>,
    pub operation: Option<OperationTransition>,
}

impl ChangeSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guard(&mut self, entity: &Entity) -> &mut Self {
        self.guards.push(VersionGuard {
            key: entity.key,
            version: entity.version,
        });
        self
    }

    pub fn insert(&mut self, entity: Entity) -> &mut Self {
        self.inserts.push(entity);
        self
    }

    pub fn update(&mut self, entity: Entity) -> &mut Self {
        self.updates.push(entity);
        self
    }

    pub fn delete(&mut self, entity: &Entity) -> &mut Self {
        self.deletes.push(VersionGuard {
            key: entity.key,
            version: entity.version,
        });
        self
    }

    pub fn transition(&mut self, expected_phase: Phase, operation: DeferredOperation) -> &mut Self {
        self.operation = Some(OperationTransition {
            expected_phase,
            operation,
        });
        self
    }

    /// Number of entity writes (inserts, updates, deletes).
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }
}

/// Storage trait for the operation core.
///
/// # Safety Considerations
/// - `claim_operation` and `commit` must be atomic with respect to each other
/// - Implementations should handle concurrent access safely
pub trait Datastore: Send + Sync {
    /// Batched fetch: one round trip for all keys. Missing keys are omitted.
    fn get_many(&self, keys: &[EntityKey]) -> Result<Vec<Entity>, StorageError>;

    /// Fetch a single entity.
    fn get(&self, key: EntityKey) -> Result<Option<Entity>, StorageError> {
        Ok(self.get_many(&[key])?.into_iter().next())
    }

    /// All items whose owner is `owner`, in key order.
    fn items_owned_by(&self, owner: EntityKey) -> Result<Vec<Entity>, StorageError>;

    /// Insert a new entity. Returns error if the key already exists.
    fn insert(&self, entity: Entity) -> Result<(), StorageError>;

    /// Reserve a fresh id for a new entity of `kind`.
    fn allocate_id(&self, kind: EntityKind) -> Result<u64, StorageError>;

    /// The actor's non-terminal operation, if any.
    fn active_operation(&self, actor: EntityKey) -> Result<Option<DeferredOperation>, StorageError>;

    /// Atomically store `operation` as the actor's active operation.
    ///
    /// # Errors
    /// - `ActorBusy`: the owner already has a non-terminal operation
    fn claim_operation(&self, operation: DeferredOperation) -> Result<(), StorageError>;

    /// Apply a change set all-or-nothing.
    ///
    /// # Errors
    /// - `VersionConflict`: a guard, update or delete version is stale
    /// - `DuplicateKey`: an insert key is taken
    /// - `OperationNotFound` / `PhaseConflict`: the operation moved on
    fn commit(&self, changes: ChangeSet) -> Result<(), StorageError>;

    /// Archived (terminal) operations of an actor, oldest first.
    fn operation_history(&self, actor: EntityKey) -> Result<Vec<DeferredOperation>, StorageError>;
}
