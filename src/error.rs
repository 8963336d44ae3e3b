//! Error types for longops.
//!
//! Errors are split by who can act on them. [`UserError`] values are
//! recoverable by the player and are surfaced verbatim; everything else is a
//! programmer, input or infrastructure failure that is logged and surfaced as
//! a generic message.

use thiserror::Error;

use crate::checks::Check;
use crate::entity::EntityKey;

/// Player-recoverable rejections.
///
/// None of these leave persisted state modified: the operation stays in the
/// phase it was in before the request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UserError {
    #[error("{message}")]
    PreconditionFailed {
        check: Check,
        message: String,
    },

    #[error("You are already busy with something else. Finish or cancel it first.")]
    ActorBusy,

    #[error("This is not finished yet ({remaining_millis}ms remaining).")]
    NotReady {
        remaining_millis: i64,
    },

    #[error("You are missing something for '{slot}' ({label}).")]
    UnsatisfiedRequirement {
        requirement: EntityKey,
        slot: String,
        label: String,
    },

    #[error("The item you selected for '{slot}' cannot be used: {reason}")]
    InvalidSelection {
        slot: String,
        reason: String,
    },

    #[error("Your materials changed since you started ('{slot}': {reason}).")]
    ResolutionStale {
        slot: String,
        reason: String,
    },

    #[error("You are not doing anything right now.")]
    NoActiveOperation,
}

/// Input validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Malformed input for '{field}': {reason}")]
    MalformedInput {
        field: String,
        reason: String,
    },

    #[error("Operation payload schema mismatch: found {found}, expected {expected}")]
    PayloadSchema {
        found: String,
        expected: String,
    },
}

impl ValidationError {
    /// Shorthand for a malformed request field.
    #[must_use]
    pub fn malformed(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedInput {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by the request runtime.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Request queue full for shard {shard} (capacity {capacity})")]
    QueueFull {
        shard: usize,
        capacity: usize,
    },

    #[error("Runtime shard {shard} disconnected")]
    Disconnected {
        shard: usize,
    },

    #[error("Request timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },
}

pub use crate::storage::StorageError;

/// Top-level error type for longops.
#[derive(Debug, Error)]
pub enum LongOpError {
    #[error(transparent)]
    User(#[from] UserError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

/// Message shown to the player for any non-user error.
pub const GENERIC_FAILURE: &str = "Something went wrong. Please try again.";

impl LongOpError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if the player can act on this error.
    #[must_use]
    pub const fn is_user_facing(&self) -> bool {
        matches!(self, Self::User(_))
    }

    /// Returns the user error, if this is one.
    #[must_use]
    pub const fn as_user(&self) -> Option<&UserError> {
        match self {
            Self::User(e) => Some(e),
            _ => None,
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Text to show the player.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::User(e) => e.to_string(),
            _ => GENERIC_FAILURE.to_string(),
        }
    }

    /// Returns true if retrying the same request later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::User(e) => matches!(e, UserError::NotReady { .. }),
            Self::Execution(e) => matches!(
                e,
                ExecutionError::QueueFull { .. } | ExecutionError::Timeout { .. }
            ),
            Self::Storage(StorageError::VersionConflict { .. }) => true,
            _ => false,
        }
    }
}

/// Result type alias for longops operations.
pub type LongOpResult<T> = Result<T, LongOpError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityKind;

    #[test]
    fn test_user_error_message_is_verbatim() {
        let err: LongOpError = UserError::PreconditionFailed {
            check: Check::Trading,
            message: "You cannot experiment right now. You're currently trading.".to_string(),
        }
        .into();
        assert!(err.is_user_facing());
        assert_eq!(
            err.user_message(),
            "You cannot experiment right now. You're currently trading."
        );
    }

    #[test]
    fn test_not_ready_mentions_remaining() {
        let err = UserError::NotReady { remaining_millis: 1200 };
        assert!(err.to_string().contains("1200ms"));
    }

    #[test]
    fn test_unsatisfied_requirement_names_slot() {
        let err = UserError::UnsatisfiedRequirement {
            requirement: EntityKey::new(EntityKind::Requirement, 3),
            slot: "Hammer".to_string(),
            label: "Required Tools/Equipment".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Hammer"));
        assert!(msg.contains("Required Tools/Equipment"));
    }

    #[test]
    fn test_validation_error_is_not_user_facing() {
        let err: LongOpError = ValidationError::malformed("ideaId", "not a number").into();
        assert!(err.is_validation());
        assert!(!err.is_user_facing());
        assert_eq!(err.user_message(), GENERIC_FAILURE);
        assert!(err.to_string().contains("ideaId"));
    }

    #[test]
    fn test_internal_error() {
        let err = LongOpError::internal("unexpected state");
        assert!(!err.is_user_facing());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("unexpected state"));
    }

    #[test]
    fn test_retryable() {
        let not_ready: LongOpError = UserError::NotReady { remaining_millis: 5 }.into();
        assert!(not_ready.is_retryable());

        let busy: LongOpError = UserError::ActorBusy.into();
        assert!(!busy.is_retryable());

        let full: LongOpError = ExecutionError::QueueFull { shard: 0, capacity: 8 }.into();
        assert!(full.is_retryable());
    }
}
