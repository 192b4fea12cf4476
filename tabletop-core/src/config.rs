//! Engine configuration.

use crate::dice::{RollOptions, DEFAULT_MAX_EXPLOSIONS};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Tunables for the statistics cache, dice defaults and event fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum cached derived-statistics entries.
    pub stats_cache_capacity: usize,

    /// Seconds a cached statistics entry stays valid.
    pub stats_cache_ttl_secs: u64,

    /// Natural d20 face at or above which a roll is critical.
    pub critical_threshold: u32,

    /// Extra faces one exploding die may add.
    pub max_explosions: u32,

    /// Buffered events per encounter subscriber channel.
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stats_cache_capacity: 1024,
            stats_cache_ttl_secs: 300,
            critical_threshold: 20,
            max_explosions: DEFAULT_MAX_EXPLOSIONS,
            event_channel_capacity: 64,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_stats_cache(mut self, capacity: usize, ttl: Duration) -> Self {
        self.stats_cache_capacity = capacity;
        self.stats_cache_ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_critical_threshold(mut self, threshold: u32) -> Self {
        self.critical_threshold = threshold;
        self
    }

    pub fn with_max_explosions(mut self, max: u32) -> Self {
        self.max_explosions = max;
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    pub fn stats_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.stats_cache_ttl_secs)
    }

    /// Roll options carrying the configured critical threshold and explosion cap.
    pub fn roll_options(&self) -> RollOptions {
        RollOptions {
            critical_threshold: self.critical_threshold,
            max_explosions: self.max_explosions,
            ..RollOptions::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stats_cache_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "stats_cache_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.stats_cache_ttl_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "stats_cache_ttl_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(2..=20).contains(&self.critical_threshold) {
            return Err(ConfigError::Invalid {
                field: "critical_threshold",
                reason: format!("{} is outside 2..=20", self.critical_threshold),
            });
        }
        if self.event_channel_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "event_channel_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
