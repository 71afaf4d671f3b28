//! # Batch Engine Configuration
//!
//! Construction-time settings for a [`BatchEngine`](crate::batching::BatchEngine).
//! Values are fixed once the engine is built; nothing is re-read at runtime.
//!
//! ## Sources
//!
//! [`ConfigManager`] merges, in increasing precedence:
//!
//! 1. `config/batch-engine.yaml`
//! 2. `config/batch-engine.<environment>.yaml`
//! 3. `BATCH_ENGINE__*` environment variables
//!
//! ```yaml
//! # batch-engine.yaml
//! name: vmss_batching
//! quiet_period_ms: 3000
//! poll_interval_ms: 1000
//! default_claim_timeout_ms: 600000
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use batch_engine::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let quiet_period = manager.config().quiet_period();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{
    DEFAULT_ENGINE_NAME, DEFAULT_POLL_INTERVAL_MS, DEFAULT_QUIET_PERIOD_MS, MAX_POLL_INTERVAL_MS,
    MAX_QUIET_PERIOD_MS,
};

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration for one batch engine instance
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchEngineConfig {
    /// Engine name attached to every log line (e.g. the scale-set namer it serves)
    pub name: String,

    /// Debounce window: how long a key must stay quiet before its batch is flushed
    pub quiet_period_ms: u64,

    /// How often a blocked caller re-checks the result store
    pub poll_interval_ms: u64,

    /// Deadline applied to `execute` when the caller gives none. `None` waits until a
    /// result arrives or the engine drains.
    pub default_claim_timeout_ms: Option<u64>,
}

impl Default for BatchEngineConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_ENGINE_NAME.to_string(),
            quiet_period_ms: DEFAULT_QUIET_PERIOD_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            default_claim_timeout_ms: None,
        }
    }
}

impl BatchEngineConfig {
    /// Builder-style override of the engine name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Builder-style override of the quiet period
    pub fn with_quiet_period(mut self, quiet_period: Duration) -> Self {
        self.quiet_period_ms = quiet_period.as_millis() as u64;
        self
    }

    /// Builder-style override of the poll interval
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval_ms = poll_interval.as_millis() as u64;
        self
    }

    /// Builder-style override of the default claim timeout
    pub fn with_default_claim_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_claim_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn default_claim_timeout(&self) -> Option<Duration> {
        self.default_claim_timeout_ms.map(Duration::from_millis)
    }

    /// Validate configuration values
    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "name",
                self.name.clone(),
                "engine name must not be empty",
            ));
        }

        if self.quiet_period_ms == 0 || self.quiet_period_ms > MAX_QUIET_PERIOD_MS {
            return Err(ConfigurationError::invalid_value(
                "quiet_period_ms",
                self.quiet_period_ms.to_string(),
                format!("must be between 1 and {MAX_QUIET_PERIOD_MS}"),
            ));
        }

        if self.poll_interval_ms == 0 || self.poll_interval_ms > MAX_POLL_INTERVAL_MS {
            return Err(ConfigurationError::invalid_value(
                "poll_interval_ms",
                self.poll_interval_ms.to_string(),
                format!("must be between 1 and {MAX_POLL_INTERVAL_MS}"),
            ));
        }

        if self.default_claim_timeout_ms == Some(0) {
            return Err(ConfigurationError::invalid_value(
                "default_claim_timeout_ms",
                "0",
                "omit the field to wait without a deadline",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_timings() {
        let config = BatchEngineConfig::default();
        assert_eq!(config.quiet_period(), Duration::from_secs(3));
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.default_claim_timeout(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_overrides() {
        let config = BatchEngineConfig::default()
            .with_name("vmss_batching")
            .with_quiet_period(Duration::from_millis(50))
            .with_poll_interval(Duration::from_millis(5))
            .with_default_claim_timeout(Some(Duration::from_secs(2)));

        assert_eq!(config.name, "vmss_batching");
        assert_eq!(config.quiet_period_ms, 50);
        assert_eq!(config.poll_interval_ms, 5);
        assert_eq!(config.default_claim_timeout_ms, Some(2_000));
    }

    #[test]
    fn test_validation_rejects_zero_durations() {
        let config = BatchEngineConfig {
            quiet_period_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { field, .. }) if field == "quiet_period_ms"
        ));

        let config = BatchEngineConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = BatchEngineConfig {
            default_claim_timeout_ms: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_out_of_range_values() {
        let config = BatchEngineConfig {
            poll_interval_ms: MAX_POLL_INTERVAL_MS + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = BatchEngineConfig {
            name: "  ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: BatchEngineConfig = serde_json::from_str(r#"{"quiet_period_ms": 250}"#)
            .expect("partial config should deserialize");
        assert_eq!(config.quiet_period_ms, 250);
        assert_eq!(config.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(config.name, DEFAULT_ENGINE_NAME);
    }
}
