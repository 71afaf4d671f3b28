//! Configuration Loader
//!
//! Environment-aware configuration loading. Handles file discovery, environment
//! detection and layering of environment-specific overrides.

use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::BatchEngineConfig;
use crate::constants::{
    CONFIG_FILE_STEM, DEFAULT_CONFIG_DIRECTORY, DEFAULT_ENVIRONMENT, ENVIRONMENT_VARIABLES,
    ENV_PREFIX, ENV_SEPARATOR,
};

/// Loaded, validated configuration together with where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: BatchEngineConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    /// This is useful for testing without modifying global environment variables
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory =
            config_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIRECTORY));

        debug!(
            "Loading batch engine configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let config = Self::load_and_merge_config(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = %environment,
            engine = %config.name,
            quiet_period_ms = config.quiet_period_ms,
            poll_interval_ms = config.poll_interval_ms,
            "⚙️ CONFIG: Batch engine configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &BatchEngineConfig {
        &self.config
    }

    /// Get the environment the configuration was loaded for
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Get the directory configuration files were read from
    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Configuration as JSON for diagnostics
    pub fn debug_config(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null)
    }

    /// Detect current environment from environment variables
    pub fn detect_environment() -> String {
        ENVIRONMENT_VARIABLES
            .iter()
            .find_map(|name| env::var(name).ok().filter(|value| !value.is_empty()))
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string())
    }

    /// Base file path for a configuration directory
    pub fn base_config_path(config_directory: &Path) -> PathBuf {
        config_directory.join(format!("{CONFIG_FILE_STEM}.yaml"))
    }

    /// Environment override file path for a configuration directory
    pub fn environment_config_path(config_directory: &Path, environment: &str) -> PathBuf {
        config_directory.join(format!("{CONFIG_FILE_STEM}.{environment}.yaml"))
    }

    /// Layer base file, environment file and environment variables, then deserialize
    fn load_and_merge_config(
        config_directory: &Path,
        environment: &str,
    ) -> ConfigResult<BatchEngineConfig> {
        let base_path = Self::base_config_path(config_directory);
        let environment_path = Self::environment_config_path(config_directory, environment);

        for path in [&base_path, &environment_path] {
            if path.is_file() {
                debug!("Applying configuration file: {}", path.display());
            }
        }

        let merged = Config::builder()
            .add_source(
                File::new(&base_path.to_string_lossy(), FileFormat::Yaml).required(false),
            )
            .add_source(
                File::new(&environment_path.to_string_lossy(), FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| {
                ConfigurationError::load_error(config_directory.display().to_string(), e)
            })?;

        merged
            .try_deserialize::<BatchEngineConfig>()
            .map_err(ConfigurationError::deserialization_error)
    }
}
