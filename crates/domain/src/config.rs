//! Application configuration
//!
//! Every field has a documented default so a partial file (or no file at
//! all) yields a usable configuration. Loading lives in
//! `mailsync-infra::config::loader`; this module only defines the shape and
//! [`Config::validate`], which every loading path calls exactly once.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_DRAIN_BATCH_SIZE, DEFAULT_ERROR_BACKOFF_SECS, DEFAULT_MAX_CONCURRENT_SYNCS,
    DEFAULT_MAX_RETRIES, DEFAULT_RETENTION_DAYS, DEFAULT_RETRY_BASE_DELAY_SECS,
    DEFAULT_RETRY_MAX_DELAY_SECS, DEFAULT_TOKEN_SAFETY_WINDOW_SECS,
};
use crate::errors::{MailSyncError, Result};
use crate::types::Priority;

/// Root configuration
///
/// # Example
/// ```
/// use std::time::Duration;
///
/// use mailsync_domain::{Config, LogFormat};
///
/// let config = Config::default();
/// assert_eq!(config.sync.interval(), Duration::from_secs(300));
/// assert_eq!(config.token.safety_window(), Duration::from_secs(300));
/// assert_eq!(config.resilience.sink.call_timeout(), Duration::from_secs(30));
/// assert_eq!(config.logging.format, LogFormat::Pretty);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Store location and pool
    pub database: DatabaseConfig,
    /// Orchestrator and periodic mode
    pub sync: SyncConfig,
    /// Credential refresh
    pub token: TokenConfig,
    /// Queue retries, batching and priority
    pub transmission: TransmissionConfig,
    /// Breaker, retry and timeout per remote dependency
    pub resilience: DependencySettings,
    /// Remote mailbox and identity provider
    pub graph: GraphConfig,
    /// Where detected changes are delivered
    pub sink: SinkConfig,
    /// Log level and format
    pub logging: LoggingConfig,
}

impl Config {
    /// Check cross-field constraints. Called by every loader path.
    pub fn validate(&self) -> Result<()> {
        if self.database.path.as_os_str().is_empty() {
            return Err(invalid("database.path must not be empty"));
        }
        if self.database.pool_size == 0 {
            return Err(invalid("database.pool_size must be greater than 0"));
        }
        if self.sync.max_concurrent == 0 {
            return Err(invalid("sync.max_concurrent must be greater than 0"));
        }
        if self.sync.interval_secs == 0 {
            return Err(invalid("sync.interval_secs must be greater than 0"));
        }
        if self.transmission.batch_size == 0 {
            return Err(invalid("transmission.batch_size must be greater than 0"));
        }
        if self.transmission.retry_max_delay_secs < self.transmission.retry_base_delay_secs {
            return Err(invalid("transmission.retry_max_delay_secs must be >= retry_base_delay_secs"));
        }
        let multiplier = self.transmission.retry_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(invalid("transmission.retry_multiplier must be >= 1.0"));
        }

        for (name, settings) in [
            ("mailbox", &self.resilience.mailbox),
            ("identity", &self.resilience.identity),
            ("sink", &self.resilience.sink),
        ] {
            settings.validate().map_err(|e| invalid(&format!("resilience.{name}: {e}")))?;
        }

        Ok(())
    }
}

fn invalid(message: &str) -> MailSyncError {
    MailSyncError::Config(message.to_string())
}

/// SQLite store location and pool size
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file. Default: `mailsync.db`
    pub path: PathBuf,
    /// Connections in the r2d2 pool. Default: 8
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: PathBuf::from("mailsync.db"), pool_size: 8 }
    }
}

/// Orchestrator and periodic-mode settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Accounts synced concurrently. Default: 5
    pub max_concurrent: usize,
    /// Use the stored delta cursor. Default: true
    pub use_delta: bool,
    /// Seconds between periodic cycles. Default: 300
    pub interval_secs: u64,
    /// Periodic mode stops scheduling cycles after this. Default: 3600
    pub max_duration_secs: u64,
    /// Extra sleep after a failed cycle. Default: 60
    pub error_backoff_secs: u64,
    /// Drain each account's new items right after detection. Default: true
    pub transmit_after_detect: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT_SYNCS,
            use_delta: true,
            interval_secs: 300,
            max_duration_secs: 3600,
            error_backoff_secs: DEFAULT_ERROR_BACKOFF_SECS,
            transmit_after_detect: true,
        }
    }
}

impl SyncConfig {
    /// Pause between periodic cycles
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Time after which periodic mode stops scheduling
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }

    /// Extra pause after a failed cycle
    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}

/// Credential refresh settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Refresh when the access token expires within this window. Default: 300
    pub safety_window_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self { safety_window_secs: DEFAULT_TOKEN_SAFETY_WINDOW_SECS }
    }
}

impl TokenConfig {
    /// Refresh lead time
    pub fn safety_window(&self) -> Duration {
        Duration::from_secs(self.safety_window_secs)
    }
}

/// Transmission pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransmissionConfig {
    /// Scheduled retries before a record fails for good. Default: 3
    pub max_retries: u32,
    /// Records claimed per drain. Default: 50
    pub batch_size: usize,
    /// Default: 60
    pub retry_base_delay_secs: u64,
    /// Default: 1800
    pub retry_max_delay_secs: u64,
    /// Default: 2.0
    pub retry_multiplier: f64,
    /// Default: true
    pub jitter: bool,
    /// Seconds between background drains. Default: 30
    pub poll_interval_secs: u64,
    /// Priority of records enqueued by the orchestrator. Default: normal
    pub default_priority: Priority,
    /// Terminal records older than this are removed by cleanup. Default: 30
    pub retention_days: u32,
}

impl Default for TransmissionConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            batch_size: DEFAULT_DRAIN_BATCH_SIZE,
            retry_base_delay_secs: DEFAULT_RETRY_BASE_DELAY_SECS,
            retry_max_delay_secs: DEFAULT_RETRY_MAX_DELAY_SECS,
            retry_multiplier: 2.0,
            jitter: true,
            poll_interval_secs: 30,
            default_priority: Priority::Normal,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

/// Resilience settings for each remote dependency
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencySettings {
    pub mailbox: ResilienceSettings,
    pub identity: ResilienceSettings,
    pub sink: ResilienceSettings,
}

/// Breaker, retry, bulkhead and timeout settings for one dependency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    /// Default: 5
    pub failure_threshold: u32,
    /// Default: 60
    pub recovery_timeout_secs: u64,
    /// Default: 3
    pub success_threshold: u32,
    /// Attempts per call, including the first. Default: 3
    pub max_attempts: u32,
    /// `fixed`, `linear`, `exponential` or `random`. Default: exponential
    pub strategy: String,
    /// Default: 1000
    pub base_delay_ms: u64,
    /// Default: 60000
    pub max_delay_ms: u64,
    /// Default: 2.0
    pub multiplier: f64,
    /// Default: true
    pub jitter: bool,
    /// Concurrent calls to this dependency. Default: 10
    pub max_concurrent: usize,
    /// Per-attempt timeout. Default: 30
    pub call_timeout_secs: u64,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60,
            success_threshold: 3,
            max_attempts: 3,
            strategy: "exponential".to_string(),
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            jitter: true,
            max_concurrent: 10,
            call_timeout_secs: 30,
        }
    }
}

impl ResilienceSettings {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.failure_threshold == 0 || self.success_threshold == 0 {
            return Err("breaker thresholds must be greater than 0".to_string());
        }
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".to_string());
        }
        if self.max_concurrent == 0 {
            return Err("max_concurrent must be greater than 0".to_string());
        }
        if self.call_timeout_secs == 0 {
            return Err("call_timeout_secs must be greater than 0".to_string());
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err("max_delay_ms must be >= base_delay_ms".to_string());
        }
        if !matches!(self.strategy.as_str(), "fixed" | "linear" | "exponential" | "random") {
            return Err(format!("unknown backoff strategy '{}'", self.strategy));
        }
        Ok(())
    }

    /// Open-circuit cool-down
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }

    /// Deadline of a single attempt
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Microsoft Graph mailbox and identity settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Default: `https://graph.microsoft.com/v1.0`
    pub api_base: String,
    /// Default: `https://login.microsoftonline.com`
    pub authority: String,
    /// Directory tenant. Default: `common`
    pub tenant: String,
    /// Application id registered with the provider
    pub client_id: String,
    /// Omitted for public clients
    pub client_secret: Option<String>,
    /// Default: `http://localhost:8765/callback`
    pub redirect_uri: String,
    /// Default: `offline_access Mail.Read`
    pub scopes: Vec<String>,
    /// Folder scanned for changes. Default: `inbox`
    pub mail_folder: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            api_base: "https://graph.microsoft.com/v1.0".to_string(),
            authority: "https://login.microsoftonline.com".to_string(),
            tenant: "common".to_string(),
            client_id: String::new(),
            client_secret: None,
            redirect_uri: "http://localhost:8765/callback".to_string(),
            scopes: vec!["offline_access".to_string(), "Mail.Read".to_string()],
            mail_folder: "inbox".to_string(),
        }
    }
}

/// Downstream sink service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Required; every endpoint is resolved against it
    pub base_url: String,
    /// Sent as a bearer token when set
    pub api_key: Option<String>,
    /// Path used when a record has no endpoint of its own. Default: `/items`
    pub default_endpoint: Option<String>,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Tracing subscriber settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset. Default: `info`
    pub level: String,
    /// Default: `pretty`
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Pretty }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sync.max_concurrent, 5);
        assert_eq!(config.token.safety_window(), Duration::from_secs(300));
        assert_eq!(config.transmission.max_retries, 3);
        assert_eq!(config.resilience.sink.failure_threshold, 5);
    }

    /// Validates `Config::validate` for broken values.
    ///
    /// Assertions:
    /// - Zero concurrency, inverted delays and unknown strategies are
    ///   rejected with a `Config` error naming the field.
    #[test]
    fn rejects_invalid_values() {
        let mut config = Config::default();
        config.sync.max_concurrent = 0;
        assert!(matches!(config.validate(), Err(MailSyncError::Config(m)) if m.contains("max_concurrent")));

        let mut config = Config::default();
        config.transmission.retry_max_delay_secs = 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.resilience.mailbox.strategy = "fibonacci".into();
        assert!(matches!(config.validate(), Err(MailSyncError::Config(m)) if m.contains("resilience.mailbox")));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: Config = serde_json::from_str(
            r#"{ "sync": { "max_concurrent": 2 }, "logging": { "format": "json" } }"#,
        )
        .expect("parses");
        assert_eq!(config.sync.max_concurrent, 2);
        assert_eq!(config.sync.interval_secs, 300);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
    }
}
