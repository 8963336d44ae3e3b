//! Persistent storage backend for longops.
//!
//! Durable, crash-safe storage built from:
//! - Write-Ahead Logging (WAL) for crash recovery
//! - CRC32 checksums for corruption detection
//! - One log record per commit, so a completion's effect and its phase change
//!   become durable together
//! - Snapshot compaction, so replay cost follows live state rather than
//!   every operation ever run
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │             PersistentDatastore              │
//! ├─────────────────────────────────────────────┤
//! │  ┌──────────────────┐   ┌────────────────┐  │
//! │  │ StoreState       │←──│ WriteAheadLog  │  │
//! │  │ (validate/apply) │   │ (append-only)  │  │
//! │  └──────────────────┘   └────────────────┘  │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! The store assumes a single process owns the data directory.

mod codec;
mod stores;
mod wal;

pub use stores::{CompactionResult, PersistentDatastore, WAL_FILE};
pub use wal::{WalEntry, WalEntryKind, WriteAheadLog};

use std::path::Path;

use serde::Deserialize;

use crate::storage::{StorageError, DEFAULT_HISTORY_LIMIT};

/// Configuration for persistent storage.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistentConfig {
    /// Whether to fsync after every record (slower but safer).
    pub sync_on_write: bool,
    /// Archived operations kept per actor.
    pub history_limit: usize,
    /// Compact the log once it grows past this many bytes. `None` leaves
    /// compaction to explicit [`PersistentDatastore::compact`] calls.
    pub compact_after_bytes: Option<u64>,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
            history_limit: DEFAULT_HISTORY_LIMIT,
            compact_after_bytes: Some(64 * 1024 * 1024),
        }
    }
}

/// Open or create a persistent datastore in `path`.
///
/// # Errors
/// - If the path cannot be created or accessed
/// - If WAL replay fails due to corruption
///
/// # Example
/// ```rust,ignore
/// use std::sync::Arc;
/// use longops::storage::open_datastore;
///
/// let store = Arc::new(open_datastore("./world.lops", None)?);
/// let engine = LongOpEngine::new(store);
/// ```
pub fn open_datastore(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> Result<PersistentDatastore, StorageError> {
    let cfg = config.unwrap_or_default();
    PersistentDatastore::open(path.as_ref(), &cfg)
}
