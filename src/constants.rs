//! # System Constants
//!
//! Default timings and naming used across the batch engine.

/// Quiet period after the most recent arrival for a key before its batch is flushed
pub const DEFAULT_QUIET_PERIOD_MS: u64 = 3_000;

/// Interval between result availability checks in `claim`
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Upper bound accepted for the quiet period (10 minutes)
pub const MAX_QUIET_PERIOD_MS: u64 = 600_000;

/// Upper bound accepted for the poll interval
pub const MAX_POLL_INTERVAL_MS: u64 = 60_000;

/// Engine name used in logs when none is configured
pub const DEFAULT_ENGINE_NAME: &str = "batch_engine";

/// Stem of the configuration files (`batch-engine.yaml`, `batch-engine.<env>.yaml`)
pub const CONFIG_FILE_STEM: &str = "batch-engine";

/// Directory searched for configuration files when none is given
pub const DEFAULT_CONFIG_DIRECTORY: &str = "config";

/// Prefix for environment variable overrides (`BATCH_ENGINE__QUIET_PERIOD_MS=500`)
pub const ENV_PREFIX: &str = "BATCH_ENGINE";

/// Separator between prefix and nested keys in environment overrides
pub const ENV_SEPARATOR: &str = "__";

/// Environment variables consulted, in order, to detect the deployment environment
pub const ENVIRONMENT_VARIABLES: [&str; 2] = ["BATCH_ENGINE_ENV", "APP_ENV"];

/// Deployment environment used when none of [`ENVIRONMENT_VARIABLES`] is set
pub const DEFAULT_ENVIRONMENT: &str = "development";
