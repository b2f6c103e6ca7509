//! Integration tests for diskblob-config
//!
//! These tests verify the full config loading pipeline with real file system operations.

use std::path::PathBuf;

use diskblob_config::{Config, ConfigError, LogLevel};
use tempfile::tempdir;

fn no_env(_: &str) -> Option<String> {
    None
}

/// Test config loading from real global config file
#[test]
fn test_load_global_config_from_file() {
    let temp = tempdir().unwrap();
    let global = temp.path().join("config.toml");
    std::fs::write(
        &global,
        r#"
[storage]
root = "/custom/blobs"
hash = "blake3"

[limits]
stat_gate_size = 32
self_check = false

[logging]
level = "info"
"#,
    )
    .unwrap();

    let config = Config::load_layers(Some(&global), None, no_env).unwrap();
    assert_eq!(config.storage.root, PathBuf::from("/custom/blobs"));
    assert_eq!(config.storage.hash, "blake3");
    assert_eq!(config.limits.stat_gate_size, 32);
    assert!(!config.limits.self_check);
    // Unset fields keep their defaults.
    assert_eq!(config.limits.fd_budget_percent, 80);
    assert_eq!(config.log_level(), LogLevel::Info);
}

/// Test config hierarchy: project config overrides global
#[test]
fn test_config_hierarchy_project_overrides_global() {
    let temp = tempdir().unwrap();
    let global = temp.path().join("global.toml");
    let project = temp.path().join("project.toml");
    std::fs::write(
        &global,
        r#"
[storage]
root = "/global/blobs"

[limits]
stat_gate_size = 4
"#,
    )
    .unwrap();
    std::fs::write(
        &project,
        r#"
[storage]
hash = "sha256"

[limits]
fd_budget_percent = 50
"#,
    )
    .unwrap();

    let config = Config::load_layers(Some(&global), Some(&project), no_env).unwrap();
    assert_eq!(config.storage.root, PathBuf::from("/global/blobs"));
    assert_eq!(config.storage.hash, "sha256");
    assert_eq!(config.limits.stat_gate_size, 4);
    assert_eq!(config.limits.fd_budget_percent, 50);
}

#[test]
fn test_env_overrides_files() {
    let temp = tempdir().unwrap();
    let global = temp.path().join("config.toml");
    std::fs::write(&global, "[storage]\nroot = \"/from/file\"\n").unwrap();

    let config = Config::load_layers(Some(&global), None, |key| match key {
        "DISKBLOB_ROOT" => Some("/from/env".to_string()),
        "DISKBLOB_STAT_GATE" => Some("3".to_string()),
        _ => None,
    })
    .unwrap();
    assert_eq!(config.storage.root, PathBuf::from("/from/env"));
    assert_eq!(config.limits.stat_gate_size, 3);
}

#[test]
fn test_missing_files_give_defaults() {
    let temp = tempdir().unwrap();
    let config = Config::load_layers(
        Some(&temp.path().join("nope.toml")),
        Some(&temp.path().join("also-nope.toml")),
        no_env,
    )
    .unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_malformed_toml_is_an_error() {
    let temp = tempdir().unwrap();
    let global = temp.path().join("config.toml");
    std::fs::write(&global, "[storage\nroot = ").unwrap();

    let err = Config::load_layers(Some(&global), None, no_env).unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)));
}

#[test]
fn test_out_of_range_budget_is_rejected() {
    let temp = tempdir().unwrap();
    let global = temp.path().join("config.toml");
    std::fs::write(&global, "[limits]\nfd_budget_percent = 150\n").unwrap();

    let err = Config::load_layers(Some(&global), None, no_env).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn test_unknown_hash_is_rejected_at_load() {
    let temp = tempdir().unwrap();
    let global = temp.path().join("config.toml");
    std::fs::write(&global, "[storage]\nhash = \"crc32\"\n").unwrap();
    let err = Config::load_layers(Some(&global), None, no_env).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));

    let err = Config::load_layers(None, None, |key| {
        (key == "DISKBLOB_HASH").then(|| "md5".to_string())
    })
    .unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn test_default_toml_parses_back() {
    let rendered = Config::default_toml().unwrap();
    let parsed: Config = toml::from_str(&rendered).unwrap();
    assert_eq!(parsed, Config::default());
}
