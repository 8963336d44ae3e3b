//! WAL-backed datastore.
//!
//! State lives in memory exactly as in [`InMemoryDatastore`]; every
//! mutation is validated against it, appended to the log, and only then
//! applied. Opening the store replays the log through the same validation,
//! so a replayed history that no longer validates is reported as corruption.
//!
//! [`PersistentDatastore::compact`] rewrites the log as one snapshot of the
//! current state. It also runs after a commit once the log passes
//! `compact_after_bytes`.
//!
//! [`InMemoryDatastore`]: crate::storage::InMemoryDatastore

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{info, warn};

use crate::entity::{Entity, EntityKey, EntityKind};
use crate::operation::DeferredOperation;
use crate::storage::memory::{lock_err, StoreState, StoreStats};
use crate::storage::traits::{ChangeSet, Datastore, StorageError};

use super::wal::{WalEntryKind, WriteAheadLog};
use super::PersistentConfig;

/// File name of the log inside the data directory.
pub const WAL_FILE: &str = "longops.wal";

fn io_err(context: &str, e: &std::io::Error) -> StorageError {
    StorageError::BackendError(format!("{context}: {e}"))
}

/// Result of a compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionResult {
    /// Sequence number of the snapshot record.
    pub sequence: u64,
    pub wal_size_before: u64,
    pub wal_size_after: u64,
}

/// Durable datastore rooted at a directory.
pub struct PersistentDatastore {
    root: PathBuf,
    state: RwLock<StoreState>,
    wal: WriteAheadLog,
    stats: StoreStats,
    compact_after_bytes: Option<u64>,
}

impl PersistentDatastore {
    /// Open (or create) the store at `root`, replaying its log.
    pub fn open(root: &Path, config: &PersistentConfig) -> Result<Self, StorageError> {
        std::fs::create_dir_all(root).map_err(|e| io_err("create data directory", &e))?;
        let wal = WriteAheadLog::open(&root.join(WAL_FILE), config.sync_on_write)
            .map_err(|e| io_err("open WAL", &e))?;

        let mut state = StoreState::with_history_limit(config.history_limit);
        let mut replayed = 0u64;
        for entry in wal.iter().map_err(|e| io_err("read WAL", &e))? {
            let entry = entry.map_err(|e| {
                StorageError::BackendError(format!("corrupted WAL entry: {e}"))
            })?;
            Self::replay(&mut state, entry.kind).map_err(|e| {
                StorageError::BackendError(format!(
                    "WAL entry {} does not apply: {e}",
                    entry.sequence
                ))
            })?;
            replayed += 1;
        }
        if replayed > 0 {
            info!(root = %root.display(), replayed, "replayed WAL");
        }

        Ok(Self {
            root: root.to_path_buf(),
            state: RwLock::new(state),
            wal,
            stats: StoreStats::default(),
            compact_after_bytes: config.compact_after_bytes,
        })
    }

    fn replay(state: &mut StoreState, kind: WalEntryKind) -> Result<(), StorageError> {
        match kind {
            WalEntryKind::Insert(entity) => {
                state.check_insert(&entity)?;
                state.apply_insert(entity);
            }
            WalEntryKind::Claim(operation) => {
                state.check_claim(&operation)?;
                state.apply_claim(operation);
            }
            WalEntryKind::Commit(changes) => {
                state.validate(&changes)?;
                state.apply(changes);
            }
            WalEntryKind::Snapshot(snapshot) => state.restore(snapshot),
        }
        Ok(())
    }

    fn log(&self, kind: WalEntryKind) -> Result<(), StorageError> {
        self.wal
            .append(kind)
            .map(|_| ())
            .map_err(|e| io_err("append WAL", &e))
    }

    /// Rewrite the log as a single snapshot of the current state.
    ///
    /// # Errors
    /// `BackendError` if the snapshot cannot be written. The previous log is
    /// left in place in that case.
    pub fn compact(&self) -> Result<CompactionResult, StorageError> {
        let state = self.state.write().map_err(|_| lock_err("persistent.compact"))?;
        self.compact_locked(&state)
    }

    fn compact_locked(&self, state: &StoreState) -> Result<CompactionResult, StorageError> {
        let wal_size_before = self.wal.size_bytes().map_err(|e| io_err("stat WAL", &e))?;
        let sequence = self
            .wal
            .rewrite(WalEntryKind::Snapshot(state.snapshot()))
            .map_err(|e| io_err("compact WAL", &e))?;
        let wal_size_after = self.wal.size_bytes().map_err(|e| io_err("stat WAL", &e))?;
        info!(
            root = %self.root.display(),
            sequence,
            wal_size_before,
            wal_size_after,
            "compacted WAL"
        );
        Ok(CompactionResult {
            sequence,
            wal_size_before,
            wal_size_after,
        })
    }

    /// Compacts once the log passes the configured size. A failed
    /// compaction keeps the full log, which stays valid.
    fn maybe_compact(&self, state: &StoreState) {
        let Some(limit) = self.compact_after_bytes else {
            return;
        };
        match self.wal.size_bytes() {
            Ok(size) if size > limit => {
                if let Err(e) = self.compact_locked(state) {
                    warn!(root = %self.root.display(), error = %e, "WAL compaction failed");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(root = %self.root.display(), error = %e, "WAL size unavailable"),
        }
    }

    #[must_use]
    pub const fn stats(&self) -> &StoreStats {
        &self.stats
    }

    /// Sequence number of the last durable record.
    #[must_use]
    pub fn wal_sequence(&self) -> u64 {
        self.wal.current_sequence()
    }
}

impl Datastore for PersistentDatastore {
    fn get_many(&self, keys: &[EntityKey]) -> Result<Vec<Entity>, StorageError> {
        self.stats.record_get();
        let state = self.state.read().map_err(|_| lock_err("persistent.get_many"))?;
        Ok(state.get_many(keys))
    }

    fn items_owned_by(&self, owner: EntityKey) -> Result<Vec<Entity>, StorageError> {
        self.stats.record_scan();
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("persistent.items_owned_by"))?;
        Ok(state.items_owned_by(owner))
    }

    fn insert(&self, entity: Entity) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("persistent.insert"))?;
        state.check_insert(&entity)?;
        self.log(WalEntryKind::Insert(entity.clone()))?;
        state.apply_insert(entity);
        Ok(())
    }

    fn allocate_id(&self, _kind: EntityKind) -> Result<u64, StorageError> {
        // Ids are not logged: replay recomputes the high-water mark from
        // the entities that were actually written.
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("persistent.allocate_id"))?;
        Ok(state.allocate_id())
    }

    fn active_operation(&self, actor: EntityKey) -> Result<Option<DeferredOperation>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("persistent.active_operation"))?;
        Ok(state.active_operation(actor))
    }

    fn claim_operation(&self, operation: DeferredOperation) -> Result<(), StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("persistent.claim_operation"))?;
        state.check_claim(&operation)?;
        self.log(WalEntryKind::Claim(operation.clone()))?;
        state.apply_claim(operation);
        Ok(())
    }

    fn commit(&self, changes: ChangeSet) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("persistent.commit"))?;
        state.validate(&changes)?;
        self.log(WalEntryKind::Commit(changes.clone()))?;
        state.apply(changes);
        self.stats.record_commit();
        self.maybe_compact(&state);
        Ok(())
    }

    fn operation_history(&self, actor: EntityKey) -> Result<Vec<DeferredOperation>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("persistent.operation_history"))?;
        Ok(state.history(actor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Character, Item};
    use tempfile::tempdir;

    #[test]
    fn test_reopen_restores_entities_and_versions() {
        let dir = tempdir().unwrap();
        let config = PersistentConfig::default();
        {
            let store = PersistentDatastore::open(dir.path(), &config).unwrap();
            store.insert(Entity::character(1, Character::new("Ada"))).unwrap();
            store
                .insert(Entity::item(7, Item::new("Oak log", "material/wood").owned_by(EntityKey::character(1))))
                .unwrap();
            let log = store.get(EntityKey::item(7)).unwrap().unwrap();
            let mut renamed = log.clone();
            renamed.as_item_mut().unwrap().name = "Dry oak log".to_string();
            let mut changes = ChangeSet::new();
            changes.update(renamed);
            store.commit(changes).unwrap();
            assert_eq!(store.wal_sequence(), 3);
        }

        let store = PersistentDatastore::open(dir.path(), &config).unwrap();
        let log = store.get(EntityKey::item(7)).unwrap().unwrap();
        assert_eq!(log.version, 2);
        assert_eq!(log.name(), "Dry oak log");
        assert_eq!(store.items_owned_by(EntityKey::character(1)).unwrap().len(), 1);
        assert!(store.allocate_id(EntityKind::Item).unwrap() > 7);
    }

    fn archive_cancelled(store: &PersistentDatastore, actor: EntityKey) {
        use crate::operation::{OperationKind, PayloadEnvelope, Phase};
        use chrono::{Duration, Utc};

        let now = Utc::now();
        let operation = DeferredOperation::pending(
            actor,
            OperationKind::Prototype,
            now,
            now + Duration::seconds(5),
            "experimenting",
            PayloadEnvelope::seal(OperationKind::Prototype, 1, &serde_json::json!({})).unwrap(),
        );
        store.claim_operation(operation.clone()).unwrap();
        let mut changes = ChangeSet::new();
        changes.transition(Phase::Pending, operation.finished(Phase::Cancelled, now, None));
        store.commit(changes).unwrap();
    }

    #[test]
    fn test_compaction_shrinks_log_and_preserves_state() {
        let dir = tempdir().unwrap();
        let config = PersistentConfig {
            compact_after_bytes: None,
            ..PersistentConfig::default()
        };
        let ada = EntityKey::character(1);
        let before = {
            let store = PersistentDatastore::open(dir.path(), &config).unwrap();
            store.insert(Entity::character(1, Character::new("Ada"))).unwrap();
            store.insert(Entity::item(7, Item::new("Oak log", "material/wood").owned_by(ada))).unwrap();
            for _ in 0..10 {
                archive_cancelled(&store, ada);
            }
            let result = store.compact().unwrap();
            assert!(result.wal_size_after < result.wal_size_before);
            assert_eq!(result.sequence, store.wal_sequence());
            store.operation_history(ada).unwrap()
        };

        let store = PersistentDatastore::open(dir.path(), &config).unwrap();
        assert_eq!(store.operation_history(ada).unwrap(), before);
        assert_eq!(store.items_owned_by(ada).unwrap().len(), 1);
        assert!(store.active_operation(ada).unwrap().is_none());
        assert!(store.allocate_id(EntityKind::Item).unwrap() > 7);
    }

    #[test]
    fn test_log_compacts_itself_past_threshold() {
        let dir = tempdir().unwrap();
        let config = PersistentConfig {
            sync_on_write: false,
            history_limit: 3,
            compact_after_bytes: Some(4 * 1024),
        };
        let ada = EntityKey::character(1);
        {
            let store = PersistentDatastore::open(dir.path(), &config).unwrap();
            store.insert(Entity::character(1, Character::new("Ada"))).unwrap();
            for _ in 0..50 {
                archive_cancelled(&store, ada);
            }
            assert_eq!(store.operation_history(ada).unwrap().len(), 3);
        }

        let size = std::fs::metadata(dir.path().join(WAL_FILE)).unwrap().len();
        assert!(size < 8 * 1024, "log kept growing: {size} bytes");
        let store = PersistentDatastore::open(dir.path(), &config).unwrap();
        assert_eq!(store.operation_history(ada).unwrap().len(), 3);
    }

    #[test]
    fn test_rejected_commit_is_not_logged() {
        let dir = tempdir().unwrap();
        let store = PersistentDatastore::open(dir.path(), &PersistentConfig::default()).unwrap();
        store.insert(Entity::item(7, Item::new("Oak log", "material/wood"))).unwrap();
        let mut stale = store.get(EntityKey::item(7)).unwrap().unwrap();
        stale.version = 5;
        let mut changes = ChangeSet::new();
        changes.update(stale);
        assert!(store.commit(changes).is_err());
        assert_eq!(store.wal_sequence(), 1);
    }
}
