//! Deferred operation records.
//!
//! A [`DeferredOperation`] is what survives between an actor's requests: who
//! owns it, what kind it is, when it may complete, and a versioned payload
//! holding the kind-specific state captured at begin time.
//!
//! Only `Pending`, `Completed` and `Cancelled` are ever persisted. `Ready` is
//! derived lazily from the clock by [`current_phase`], so no timer thread is
//! needed to move an operation forward.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::EntityKey;
use crate::error::ValidationError;

/// Unique operation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Creates a new random operation ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Discriminates which effect logic applies to an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Experiment on an idea until it becomes a skill plus a prototype item.
    Prototype,
    /// Construct an item with a learned skill.
    Craft,
}

impl OperationKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Prototype => "prototype",
            Self::Craft => "craft",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prototype" => Ok(Self::Prototype),
            "craft" => Ok(Self::Craft),
            other => Err(ValidationError::malformed(
                "kind",
                format!("unknown operation kind '{other}'"),
            )),
        }
    }
}

/// Lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Created, waiting for its scheduled time.
    Pending,
    /// Scheduled time reached, waiting for a completion request.
    Ready,
    /// Effect applied. Terminal.
    Completed,
    /// Aborted before completion. Terminal.
    Cancelled,
}

impl Phase {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Versioned, kind-tagged payload.
///
/// The body is decoded only through [`PayloadEnvelope::open`], which rejects a
/// payload written by another kind or another schema version instead of
/// misreading it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadEnvelope {
    pub schema_version: u32,
    pub kind: OperationKind,
    pub body: serde_json::Value,
}

impl PayloadEnvelope {
    /// Serializes `body` under the given kind and schema version.
    pub fn seal<T: Serialize>(
        kind: OperationKind,
        schema_version: u32,
        body: &T,
    ) -> Result<Self, ValidationError> {
        let body = serde_json::to_value(body).map_err(|e| ValidationError::PayloadSchema {
            found: format!("unserializable body: {e}"),
            expected: format!("{kind} v{schema_version}"),
        })?;
        Ok(Self {
            schema_version,
            kind,
            body,
        })
    }

    /// Decodes the body, checking kind and schema version first.
    pub fn open<T: DeserializeOwned>(
        &self,
        kind: OperationKind,
        schema_version: u32,
    ) -> Result<T, ValidationError> {
        if self.kind != kind || self.schema_version != schema_version {
            return Err(ValidationError::PayloadSchema {
                found: format!("{} v{}", self.kind, self.schema_version),
                expected: format!("{kind} v{schema_version}"),
            });
        }
        serde_json::from_value(self.body.clone()).map_err(|e| ValidationError::PayloadSchema {
            found: format!("{} v{} with undecodable body: {e}", self.kind, self.schema_version),
            expected: format!("{kind} v{schema_version}"),
        })
    }
}

/// A persisted deferred operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredOperation {
    pub id: OperationId,
    pub owner: EntityKey,
    pub kind: OperationKind,
    pub phase: Phase,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Countdown text shown while the operation runs.
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_message: Option<String>,
    pub payload: PayloadEnvelope,
}

impl DeferredOperation {
    /// Creates a `Pending` operation scheduled at `scheduled_at`.
    #[must_use]
    pub fn pending(
        owner: EntityKey,
        kind: OperationKind,
        created_at: DateTime<Utc>,
        scheduled_at: DateTime<Utc>,
        description: impl Into<String>,
        payload: PayloadEnvelope,
    ) -> Self {
        Self {
            id: OperationId::new(),
            owner,
            kind,
            phase: Phase::Pending,
            created_at,
            scheduled_at,
            finished_at: None,
            description: description.into(),
            result_message: None,
            payload,
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Milliseconds until the operation becomes ready; zero once it is.
    #[must_use]
    pub fn remaining_millis(&self, now: DateTime<Utc>) -> i64 {
        (self.scheduled_at - now).num_milliseconds().max(0)
    }

    /// Copy of this operation moved to a terminal phase.
    #[must_use]
    pub fn finished(&self, phase: Phase, at: DateTime<Utc>, message: Option<String>) -> Self {
        debug_assert!(phase.is_terminal());
        Self {
            phase,
            finished_at: Some(at),
            result_message: message,
            ..self.clone()
        }
    }
}

/// Lazily derived phase: a stored `Pending` operation is `Ready` once `now`
/// reaches `scheduled_at`. Terminal phases are returned unchanged.
#[must_use]
pub fn current_phase(operation: &DeferredOperation, now: DateTime<Utc>) -> Phase {
    match operation.phase {
        Phase::Pending | Phase::Ready if now >= operation.scheduled_at => Phase::Ready,
        Phase::Pending | Phase::Ready => Phase::Pending,
        terminal => terminal,
    }
}
