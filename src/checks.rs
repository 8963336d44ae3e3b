//! Actor preconditions.
//!
//! Each [`Check`] is a named predicate over a [`Character`]. A kind registers
//! the subset it cares about as a [`CheckSet`]; evaluation always follows the
//! global priority order of [`Check::PRIORITY`] so the player sees the same
//! reason regardless of how a set was assembled.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity::Character;
use crate::error::UserError;

/// A single actor precondition. Variants are declared in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    Trading,
    InCombat,
    Vending,
    Unconscious,
    Dead,
    Busy,
    /// The operation's subject (idea, skill) belongs to someone else. Checked
    /// by the kind against the subject, never by [`do_checks`].
    SubjectOwner,
}

impl Check {
    /// Evaluation order.
    pub const PRIORITY: [Self; 6] = [
        Self::Trading,
        Self::InCombat,
        Self::Vending,
        Self::Unconscious,
        Self::Dead,
        Self::Busy,
    ];

    const fn bit(self) -> u8 {
        1 << (self as u8)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trading => "trading",
            Self::InCombat => "in_combat",
            Self::Vending => "vending",
            Self::Unconscious => "unconscious",
            Self::Dead => "dead",
            Self::Busy => "busy",
            Self::SubjectOwner => "subject_owner",
        }
    }

    /// Returns true if the condition blocks the actor.
    #[must_use]
    pub fn blocks(self, character: &Character) -> bool {
        match self {
            Self::Trading => character.trading,
            Self::InCombat => character.in_combat,
            Self::Vending => character.vending,
            Self::Unconscious => !character.dead && character.hit_points <= 0,
            Self::Dead => character.dead,
            Self::Busy => character.busy,
            Self::SubjectOwner => false,
        }
    }

    /// Second sentence of the rejection message.
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::Trading => "You're currently trading.",
            Self::InCombat => "You're currently in combat.",
            Self::Vending => "You're currently manning your store.",
            Self::Unconscious => "You're currently unconscious, lol.",
            Self::Dead => "You're DEAD. D:",
            Self::Busy => "You're too busy.",
            Self::SubjectOwner => "That isn't yours.",
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of checks a kind enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CheckSet(u8);

impl CheckSet {
    pub const NONE: Self = Self(0);
    pub const ALL: Self = Self(0b11_1111);

    #[must_use]
    pub const fn with(self, check: Check) -> Self {
        Self(self.0 | check.bit())
    }

    #[must_use]
    pub const fn without(self, check: Check) -> Self {
        Self(self.0 & !check.bit())
    }

    #[must_use]
    pub const fn contains(self, check: Check) -> bool {
        self.0 & check.bit() != 0
    }

    /// Members in priority order.
    pub fn iter(self) -> impl Iterator<Item = Check> {
        Check::PRIORITY.into_iter().filter(move |c| self.contains(*c))
    }
}

impl FromIterator<Check> for CheckSet {
    fn from_iter<I: IntoIterator<Item = Check>>(iter: I) -> Self {
        iter.into_iter().fold(Self::NONE, Self::with)
    }
}

/// First check in `checks` that blocks `character`, in priority order.
#[must_use]
pub fn first_blocking(character: &Character, checks: CheckSet) -> Option<Check> {
    checks.iter().find(|c| c.blocks(character))
}

/// Runs `checks` against `character`.
///
/// # Errors
/// `PreconditionFailed` for the highest-priority blocking check, with a
/// message like "You cannot experiment right now. You're currently trading."
pub fn do_checks(character: &Character, checks: CheckSet, verb: &str) -> Result<(), UserError> {
    match first_blocking(character, checks) {
        Some(check) => Err(UserError::PreconditionFailed {
            check,
            message: format!("You cannot {verb} right now. {}", check.reason()),
        }),
        None => Ok(()),
    }
}
