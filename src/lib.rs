//! # longops - deferred multi-phase game operations
//!
//! Game actions such as experimentation or crafting take real time. A player
//! starts one, the server records it, and a later request finishes it. In
//! between, the player may do anything, including disconnect.
//!
//! ## Core Concepts
//!
//! - **DeferredOperation**: persisted `Pending` record; `Ready` is derived from
//!   the clock, `Completed`/`Cancelled` are terminal
//! - **Requirement slot**: an abstract material or tool a definition asks for
//! - **Resolution**: deterministic binding of slots to the actor's items,
//!   computed at begin and re-verified at completion
//! - **EntityPool**: per-request cache that batches datastore reads
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use longops::{EntityKey, InMemoryDatastore, LongOpEngine, OperationKind};
//!
//! let engine = LongOpEngine::new(Arc::new(InMemoryDatastore::new()));
//! let actor = EntityKey::character(1);
//!
//! let params = [("ideaId".to_string(), "42".to_string())].into_iter().collect();
//! let started = engine.begin(actor, OperationKind::Prototype, &params)?;
//! // ... started.delay_millis later ...
//! let done = engine.complete(actor)?;
//! println!("{}", done.message);
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod checks;
pub mod entity;
pub mod error;
pub mod operation;

// Storage and resolution
pub mod pool;
pub mod resolver;
pub mod storage;

// Engine
pub mod clock;
pub mod config;
pub mod engine;
pub mod kinds;
pub mod params;
pub mod runtime;
pub mod telemetry;

pub use checks::{do_checks, Check, CheckSet};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, EngineConfig, RuntimeConfig};
pub use engine::{
    BeginOutcome, CompleteOutcome, LongOpEngine, OperationView, PollOutcome, Request, Response, ResumeHint,
};
pub use entity::{
    Character, Entity, EntityBody, EntityKey, EntityKind, GenericEntityRequirement, Idea, IdeaDefinition, Item,
    Skill, TypeMatch, TypePath,
};
pub use error::{ExecutionError, LongOpError, LongOpResult, UserError, ValidationError};
pub use kinds::{ConstructionPayload, KindSpec};
pub use operation::{current_phase, DeferredOperation, OperationId, OperationKind, PayloadEnvelope, Phase};
pub use params::BeginRequest;
pub use pool::{EntityPool, PoolError};
pub use resolver::{
    RequirementGroup, RequirementSlot, RequirementSlotResolver, ResolvedSelection, SlotSelection,
};
pub use runtime::{ExecutionHandle, LongOpRuntime};
pub use storage::{ChangeSet, Datastore, InMemoryDatastore, StorageError};
