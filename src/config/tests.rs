//! Tests for config functionality.

use crate::config::Config;
use crate::config::types::DEFAULT_NAMESPACE_DIR;
use crate::error::LockError;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_default_config() {
    let config = Config::default();

    assert!(config.namespace_root.ends_with(DEFAULT_NAMESPACE_DIR));
    assert!(config.mutex_stale_check);
    assert_eq!(config.poll_interval_ms, 10);
    assert_eq!(config.poll_interval(), Duration::from_millis(10));
    assert!(config.deadlock_detection);
}

#[test]
fn test_parse_empty_yaml() {
    let config = Config::from_yaml("").unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_parse_partial_yaml() {
    let yaml = r#"
poll_interval_ms: 25
deadlock_detection: false
"#;
    let config = Config::from_yaml(yaml).unwrap();

    assert_eq!(config.poll_interval_ms, 25);
    assert!(!config.deadlock_detection);

    // Unspecified values should use defaults
    assert!(config.mutex_stale_check);
    assert!(config.namespace_root.ends_with(DEFAULT_NAMESPACE_DIR));
}

#[test]
fn test_parse_full_yaml() {
    let yaml = r#"
namespace_root: /var/run/advlock
mutex_stale_check: false
poll_interval_ms: 50
deadlock_detection: true
"#;
    let config = Config::from_yaml(yaml).unwrap();

    assert_eq!(config.namespace_root, PathBuf::from("/var/run/advlock"));
    assert!(!config.mutex_stale_check);
    assert_eq!(config.poll_interval_ms, 50);
    assert!(config.deadlock_detection);
}

#[test]
fn test_unknown_fields_are_ignored() {
    let yaml = r#"
poll_interval_ms: 5
future_option: [1, 2, 3]
"#;
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(config.poll_interval_ms, 5);
}

#[test]
fn test_zero_poll_interval_is_rejected() {
    let err = Config::from_yaml("poll_interval_ms: 0").unwrap_err();
    assert!(matches!(err, LockError::Config(_)));
    assert!(err.to_string().contains("poll_interval_ms"));
}

#[test]
fn test_invalid_yaml_is_rejected() {
    let err = Config::from_yaml("poll_interval_ms: [not, a, number]").unwrap_err();
    assert!(err.to_string().contains("failed to parse config YAML"));
}

#[test]
fn test_yaml_roundtrip_preserves_values() {
    let config = Config {
        namespace_root: PathBuf::from("/tmp/ns-test"),
        mutex_stale_check: false,
        poll_interval_ms: 3,
        deadlock_detection: false,
    };

    let yaml = config.to_yaml().unwrap();
    assert_eq!(Config::from_yaml(&yaml).unwrap(), config);
}

#[test]
fn test_load_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("advlock.yaml");
    std::fs::write(&path, "poll_interval_ms: 7\n").unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.poll_interval_ms, 7);
}

#[test]
fn test_load_missing_file() {
    let dir = TempDir::new().unwrap();
    let err = Config::load(dir.path().join("missing.yaml")).unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));
}
