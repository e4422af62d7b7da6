//! Integration tests for tmpledger-config
//!
//! These tests verify the full config loading pipeline with real file system operations.

use std::path::PathBuf;
use tempfile::tempdir;
use tmpledger_config::{Config, ConfigError};
use tmpledger_core::UnmountedPolicy;

/// Test config loading from a single global config file
#[test]
fn test_load_global_config_from_file() {
    let temp = tempdir().unwrap();
    let global = temp.path().join("config.toml");
    std::fs::write(
        &global,
        r#"
[ledger]
path = "/srv/tmpledger/ledger.dat"
max_slots = 1024

[scanner]
period_secs = 30

[mounts]
root = "/mnt/cluster"
policy = "skip-always"
"#,
    )
    .unwrap();

    let config = Config::load_from(Some(&global), None).unwrap();

    assert_eq!(config.ledger.path, PathBuf::from("/srv/tmpledger/ledger.dat"));
    assert_eq!(config.ledger.max_slots, 1024);
    assert_eq!(config.scanner.period_secs, 30);
    assert_eq!(config.mounts.root, PathBuf::from("/mnt/cluster"));
    assert_eq!(config.mounts.policy, UnmountedPolicy::SkipAlways);
    // Untouched sections keep their defaults
    assert_eq!(config.allocator.backoff_secs, 120);
}

/// Test config hierarchy: project config overrides global key by key
#[test]
fn test_config_hierarchy_project_overrides_global() {
    let temp = tempdir().unwrap();
    let global = temp.path().join("global.toml");
    let project = temp.path().join("project.toml");

    std::fs::write(
        &global,
        r#"
[ledger]
path = "/global/ledger.dat"
max_slots = 512

[daemon]
socket = "/global/d.sock"
"#,
    )
    .unwrap();
    std::fs::write(
        &project,
        r#"
[ledger]
max_slots = 64
"#,
    )
    .unwrap();

    let config = Config::load_from(Some(&global), Some(&project)).unwrap();

    assert_eq!(config.ledger.max_slots, 64);
    assert_eq!(config.ledger.path, PathBuf::from("/global/ledger.dat"));
    assert_eq!(config.daemon.socket, PathBuf::from("/global/d.sock"));
}

/// Missing files are skipped, leaving defaults
#[test]
fn test_missing_files_give_defaults() {
    let temp = tempdir().unwrap();
    let config = Config::load_from(
        Some(&temp.path().join("absent.toml")),
        Some(&temp.path().join("also-absent.toml")),
    )
    .unwrap();
    assert_eq!(config, Config::default());
}

/// Broken TOML surfaces as a parse error
#[test]
fn test_invalid_toml_is_an_error() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(&path, "[ledger\nmax_slots = ").unwrap();

    assert!(matches!(
        Config::load_from(Some(&path), None),
        Err(ConfigError::Toml(_))
    ));
}

/// Unknown policy names are rejected
#[test]
fn test_unknown_policy_is_an_error() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(&path, "[mounts]\npolicy = \"sometimes\"\n").unwrap();

    assert!(Config::load_from(Some(&path), None).is_err());
}

/// Environment overrides win over file layers
#[test]
fn test_env_overrides_beat_files() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(&path, "[scanner]\nperiod_secs = 30\n").unwrap();

    let mut config = Config::load_from(Some(&path), None).unwrap();
    config
        .apply_env_overrides_from(|key| (key == "TMPLEDGER_SCAN_PERIOD").then(|| "5".to_string()))
        .unwrap();

    assert_eq!(config.scanner.period_secs, 5);
}

/// Default TOML written to disk loads back unchanged
#[test]
fn test_config_full_roundtrip_with_all_sections() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(&path, Config::default_toml().unwrap()).unwrap();

    let loaded = Config::load_from(Some(&path), None).unwrap();
    assert_eq!(loaded, Config::default());
}
