//! Integration tests for configuration loading
//! Covers file discovery, environment overrides and validation

use std::io::Write;

use qroute_core::config::NetworkArchitecture;
use qroute_core::{Config, RouterError, TargetSyncConfig};

// Environment is process-global, so every env-dependent check lives in this one test.
#[test]
fn test_load_from_file_with_env_override() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    writeln!(
        file,
        r#"
[engine]
max_workers = 6
variation_timeout_ms = 1500

[agent]
architecture = "lightweight"
target_sync = {{ mode = "hard", every = 25 }}

[logging]
json = true
"#
    )
    .unwrap();

    std::env::set_var("QROUTE_CONFIG", file.path());
    std::env::set_var("QROUTE__AGENT__BATCH_SIZE", "64");

    let config = Config::load().unwrap();

    std::env::remove_var("QROUTE_CONFIG");
    std::env::remove_var("QROUTE__AGENT__BATCH_SIZE");

    assert_eq!(config.engine.max_workers, 6);
    assert_eq!(config.engine.variation_timeout_ms, 1500);
    assert_eq!(config.agent.architecture, NetworkArchitecture::Lightweight);
    assert_eq!(config.agent.target_sync, TargetSyncConfig::Hard { every: 25 });
    assert_eq!(config.agent.batch_size, 64);
    assert!(config.logging.json);
    // Untouched sections keep their defaults
    assert_eq!(config.reward.baseline_quality, 0.7);
}

#[test]
fn test_invalid_toml_values_rejected() {
    let result = Config::from_toml_str(
        r#"
        [agent]
        gamma = 1.5
        "#,
    );
    assert!(matches!(result, Err(RouterError::Configuration(_))));
}

#[test]
fn test_malformed_toml_is_config_error() {
    let result = Config::from_toml_str("[engine\nmax_workers = ");
    assert!(matches!(result, Err(RouterError::Config(_))));
}

#[test]
fn test_empty_document_gives_defaults() {
    let config = Config::from_toml_str("").unwrap();
    assert_eq!(config.engine.max_workers, 4);
    assert_eq!(config.agent.exploration_decay, 0.995);
    assert_eq!(config.logging.level, "info");
}
