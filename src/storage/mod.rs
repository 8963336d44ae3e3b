//! Storage for longops.
//!
//! [`Datastore`] is the abstract boundary with the game's entity store.
//! Two implementations ship with the crate: [`InMemoryDatastore`] and, with
//! the `persistent` feature, a write-ahead-logged store.

mod memory;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::{InMemoryDatastore, StoreSnapshot, StoreStats, DEFAULT_HISTORY_LIMIT};
pub use traits::{ChangeSet, Datastore, OperationTransition, StorageError, VersionGuard};

#[cfg(feature = "persistent")]
pub use persistent::{open_datastore, PersistentConfig, PersistentDatastore};
