use carlease::config::{Config, ConfigError, ConfigStore};
use std::time::Duration;
use tempfile::TempDir;

/// Test that Config::default() produces the documented values.
#[test]
fn test_config_default_values() {
    let config = Config::default();

    assert_eq!(config.api.base_url, "http://127.0.0.1:5000");
    assert_eq!(config.api.catalog_path, "/api/public");
    assert_eq!(config.api.auth_path, "/api/auth");
    assert_eq!(config.api.lease_path, "/api/lease");
    assert_eq!(config.api.payment_path, "/api/payment");
    assert_eq!(config.api.request_timeout(), Duration::from_secs(30));

    assert_eq!(config.realtime.revocation_event, "userDeleted");
    assert_eq!(config.realtime.reconnect_backoff_ms, 500);
    assert_eq!(config.cache.keep_unused(), Duration::from_secs(60));
    assert_eq!(config.validation.otp_digits, 4);
    assert!(config.storage.path.is_none());
}

#[test]
fn test_config_path_ends_with_expected() {
    let path = Config::config_path();
    assert!(path.ends_with("carlease/config.toml"));
}

#[test]
fn test_missing_file_yields_defaults() {
    let dir = TempDir::new().unwrap();
    let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.api.timeout_seconds, 30);
}

#[test]
fn test_partial_file_fills_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[api]
base_url = "https://api.carlease.test"
timeout_seconds = 10

[realtime]
url = "wss://api.carlease.test/events"

[storage]
path = "/var/lib/carlease/state.json"
"#,
    )
    .unwrap();

    let config = Config::load_from(&path).unwrap();
    assert_eq!(config.api.base_url, "https://api.carlease.test");
    assert_eq!(config.api.timeout_seconds, 10);
    assert_eq!(config.api.auth_path, "/api/auth");
    assert_eq!(config.realtime.revocation_event, "userDeleted");
    assert_eq!(
        config.storage.resolved_path(),
        std::path::PathBuf::from("/var/lib/carlease/state.json")
    );
}

#[test]
fn test_invalid_toml_is_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[api\nbase_url = ").unwrap();

    assert!(matches!(
        Config::load_from(&path),
        Err(ConfigError::ParseError { .. })
    ));
}

#[test]
fn test_validation_rejects_zero_timeout() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[api]\nbase_url = \"http://localhost\"\ntimeout_seconds = 0\n",
    )
    .unwrap();

    match Config::load_from(&path) {
        Err(ConfigError::ValidationError { message }) => {
            assert!(message.contains("timeouts"));
        }
        other => panic!("Expected ValidationError, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_store_reload_keeps_old_config_on_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[cache]\nkeep_unused_seconds = 5\n").unwrap();

    let store = ConfigStore::open(path.clone()).unwrap();
    assert_eq!(store.get().cache.keep_unused_seconds, 5);

    std::fs::write(&path, "[cache]\nkeep_unused_seconds = 7\n").unwrap();
    store.reload().unwrap();
    assert_eq!(store.get().cache.keep_unused_seconds, 7);

    std::fs::write(&path, "not = [valid").unwrap();
    assert!(store.reload().is_err());
    assert_eq!(store.get().cache.keep_unused_seconds, 7);
    assert_eq!(store.path(), path.as_path());
}
