//! Configuration loading integration tests

mod common;

use serial_test::serial;

use reviewsync::config::{Config, CredentialBackend};

#[test]
#[serial]
fn test_load_yaml_with_env_override() {
    let (_dir, path) = common::temp_config_file(
        r#"
api:
  base_url: "https://reviews.example.com/api"
  mutation_timeout_seconds: 4
live:
  url: "https://reviews.example.com/events"
  initial_backoff_ms: 250
session:
  namespace: "reviews-test"
  backend: keyring
logging:
  level: "debug"
"#,
    );
    std::env::set_var("REVIEWSYNC_LIVE_URL", "https://live.example.com/events");

    let config = Config::load(&path);
    std::env::remove_var("REVIEWSYNC_LIVE_URL");
    let config = config.unwrap();

    assert_eq!(config.api.base_url, "https://reviews.example.com/api");
    assert_eq!(config.api.mutation_timeout_seconds, 4);
    assert_eq!(config.live.url, "https://live.example.com/events");
    assert_eq!(config.live.initial_backoff_ms, 250);
    assert_eq!(config.session.namespace, "reviews-test");
    assert_eq!(config.session.backend, CredentialBackend::Keyring);
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn test_invalid_values_fail_validation() {
    let (_dir, path) = common::temp_config_file(
        r#"
api:
  base_url: "not a url"
"#,
    );

    let config = Config::load(&path).unwrap();

    assert!(config.validate().is_err());
}
