//! Engine and runtime configuration.
//!
//! Every struct has a usable `Default` and deserializes from JSON with
//! missing fields falling back to those defaults.

use std::path::Path;

use serde::Deserialize;

use crate::error::{LongOpError, LongOpResult, ValidationError};

/// Largest accepted duration clamp. Keeps delays within what a millisecond
/// count and a timestamp offset can represent.
pub const MAX_DURATION_SECS: u64 = (i64::MAX / 1000) as u64;

/// Engine tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Duration used when a definition configures none.
    pub default_duration_secs: u64,
    /// Lower clamp applied to every duration.
    pub min_duration_secs: u64,
    /// Upper clamp applied to every duration.
    pub max_duration_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_duration_secs: 5,
            min_duration_secs: 0,
            max_duration_secs: 24 * 60 * 60,
        }
    }
}

impl EngineConfig {
    /// # Errors
    /// `MalformedInput` if the clamp range is empty, exceeds
    /// [`MAX_DURATION_SECS`], or the default lies outside it.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_duration_secs > MAX_DURATION_SECS {
            return Err(ValidationError::malformed(
                "max_duration_secs",
                format!("{} exceeds {MAX_DURATION_SECS}", self.max_duration_secs),
            ));
        }
        if self.min_duration_secs > self.max_duration_secs {
            return Err(ValidationError::malformed(
                "min_duration_secs",
                format!(
                    "{} exceeds max_duration_secs {}",
                    self.min_duration_secs, self.max_duration_secs
                ),
            ));
        }
        if !(self.min_duration_secs..=self.max_duration_secs).contains(&self.default_duration_secs) {
            return Err(ValidationError::malformed(
                "default_duration_secs",
                format!(
                    "{} is outside [{}, {}]",
                    self.default_duration_secs, self.min_duration_secs, self.max_duration_secs
                ),
            ));
        }
        Ok(())
    }

    /// Effective duration for a configured value.
    #[must_use]
    pub fn duration_secs(&self, configured: Option<u64>) -> u64 {
        configured
            .unwrap_or(self.default_duration_secs)
            .clamp(self.min_duration_secs, self.max_duration_secs.max(self.min_duration_secs))
    }
}

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of worker shards. Each actor is pinned to one shard.
    pub shards: usize,
    /// Maximum queued requests per shard.
    pub queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            shards: 4,
            queue_capacity: 1024,
        }
    }
}

impl RuntimeConfig {
    /// # Errors
    /// `MalformedInput` for zero shards or a zero-capacity queue.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.shards == 0 {
            return Err(ValidationError::malformed("shards", "must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(ValidationError::malformed("queue_capacity", "must be at least 1"));
        }
        Ok(())
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub runtime: RuntimeConfig,
    #[cfg(feature = "persistent")]
    pub storage: crate::storage::PersistentConfig,
}

impl Config {
    /// Parses and validates a JSON configuration document.
    ///
    /// # Errors
    /// `MalformedInput` for invalid JSON or values that fail validation.
    pub fn from_json(raw: &str) -> Result<Self, ValidationError> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| ValidationError::malformed("config", e.to_string()))?;
        config.engine.validate()?;
        config.runtime.validate()?;
        Ok(config)
    }

    /// Reads [`Config::from_json`] from a file.
    pub fn load(path: impl AsRef<Path>) -> LongOpResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LongOpError::internal(format!("read config {}: {e}", path.display()))
        })?;
        Ok(Self::from_json(&raw)?)
    }
}
