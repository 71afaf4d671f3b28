//! Loading engine configuration from YAML files and building an engine from it.

mod common;

use batch_engine::batching::BatchEngine;
use batch_engine::config::{ConfigManager, ConfigurationError};
use common::*;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

fn write(dir: &TempDir, file_name: &str, contents: &str) {
    fs::write(dir.path().join(file_name), contents).expect("write config file");
}

#[test]
fn test_other_environment_overrides_are_ignored() {
    let dir = TempDir::new().unwrap();
    write(&dir, "batch-engine.yaml", "quiet_period_ms: 500\n");
    write(&dir, "batch-engine.production.yaml", "quiet_period_ms: 5000\n");

    let manager = assert_ok!(ConfigManager::load_from_directory_with_env(
        Some(dir.path().to_path_buf()),
        "test"
    ));

    assert_eq!(manager.config().quiet_period(), Duration::from_millis(500));
}

#[test]
fn test_shipped_configuration_is_valid_for_every_environment() {
    let config_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config");

    for environment in ["development", "test", "production"] {
        let manager =
            ConfigManager::load_from_directory_with_env(Some(config_dir.clone()), environment)
                .unwrap_or_else(|e| panic!("{environment} config should load: {e}"));
        assert_eq!(manager.environment(), environment);
    }

    let production =
        ConfigManager::load_from_directory_with_env(Some(config_dir), "production").unwrap();
    assert_eq!(production.config().quiet_period(), Duration::from_secs(3));
    assert!(production.config().default_claim_timeout().is_some());
}

#[test]
fn test_invalid_shape_is_a_deserialization_error() {
    let dir = TempDir::new().unwrap();
    write(&dir, "batch-engine.yaml", "quiet_period_ms: soon\n");

    let error = assert_err!(ConfigManager::load_from_directory_with_env(
        Some(dir.path().to_path_buf()),
        "test"
    ));

    assert!(matches!(error, ConfigurationError::DeserializationError { .. }));
}

#[tokio::test]
async fn test_engine_built_from_loaded_config() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "batch-engine.yaml",
        "name: loaded_engine\nquiet_period_ms: 20\npoll_interval_ms: 5\n",
    );
    let manager = assert_ok!(ConfigManager::load_from_directory_with_env(
        Some(dir.path().to_path_buf()),
        "test"
    ));

    let handler = RecordingHandler::new();
    let engine: TestEngine =
        BatchEngine::from_config_manager(&manager, scale_set_key, handler.clone()).unwrap();

    assert_eq!(engine.name(), "loaded_engine");
    assert_eq!(engine.execute(request("g1", 1)).await, Ok("g1-0".to_string()));
    assert_eq!(handler.batch_count(), 1);
}
