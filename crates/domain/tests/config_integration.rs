//! Integration tests for configuration parsing
//!
//! Config files are written by operators in TOML; these tests pin the file
//! shape the loader relies on.

use mailsync_domain::config::{Config, LogFormat};
use mailsync_domain::types::Priority;
use mailsync_domain::MailSyncError;

/// Validates a full TOML file with per-dependency overrides.
///
/// Assertions:
/// - Overridden values are applied, everything else keeps its default.
/// - The parsed configuration validates.
#[test]
fn parses_operator_toml() {
    let raw = r#"
        [database]
        path = "/var/lib/mailsync/state.db"

        [sync]
        max_concurrent = 8
        interval_secs = 120

        [transmission]
        max_retries = 5
        default_priority = "high"

        [resilience.sink]
        failure_threshold = 2
        strategy = "linear"

        [sink]
        base_url = "https://sink.example.com"
        api_key = "k-123"

        [logging]
        level = "mailsync=debug,info"
        format = "json"
    "#;

    let config: Config = toml::from_str(raw).expect("valid toml");
    config.validate().expect("valid config");

    assert_eq!(config.sync.max_concurrent, 8);
    assert_eq!(config.sync.error_backoff_secs, 60);
    assert_eq!(config.transmission.max_retries, 5);
    assert_eq!(config.transmission.default_priority, Priority::High);
    assert_eq!(config.resilience.sink.failure_threshold, 2);
    assert_eq!(config.resilience.sink.success_threshold, 3);
    assert_eq!(config.resilience.mailbox.strategy, "exponential");
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(config.sink.api_key.as_deref(), Some("k-123"));
}

#[test]
fn invalid_values_fail_validation() {
    let config: Config = toml::from_str(
        r#"
        [resilience.identity]
        max_attempts = 0
        "#,
    )
    .expect("valid toml");

    match config.validate() {
        Err(MailSyncError::Config(message)) => assert!(message.contains("resilience.identity")),
        other => panic!("expected config error, got {other:?}"),
    }
}
