//! Configuration loader
//!
//! ## Loading Strategy
//! 1. `MAILSYNC_CONFIG` names a file explicitly
//! 2. Otherwise environment variables, when `MAILSYNC_DB_PATH` is set
//! 3. Otherwise the first file found by [`probe_config_paths`]
//! 4. Otherwise the built-in defaults
//!
//! ## Environment Variables
//! - `MAILSYNC_DB_PATH` (required for the env path): database file
//! - `MAILSYNC_DB_POOL_SIZE`: connection pool size
//! - `MAILSYNC_SYNC_MAX_CONCURRENT`, `MAILSYNC_SYNC_INTERVAL`,
//!   `MAILSYNC_SYNC_USE_DELTA`, `MAILSYNC_SYNC_TRANSMIT`
//! - `MAILSYNC_TOKEN_SAFETY_WINDOW`
//! - `MAILSYNC_TX_MAX_RETRIES`, `MAILSYNC_TX_BATCH_SIZE`,
//!   `MAILSYNC_TX_POLL_INTERVAL`, `MAILSYNC_TX_RETENTION_DAYS`
//! - `MAILSYNC_GRAPH_TENANT`, `MAILSYNC_GRAPH_CLIENT_ID`,
//!   `MAILSYNC_GRAPH_CLIENT_SECRET`, `MAILSYNC_GRAPH_REDIRECT_URI`
//! - `MAILSYNC_SINK_URL`, `MAILSYNC_SINK_API_KEY`
//! - `MAILSYNC_LOG_LEVEL`, `MAILSYNC_LOG_FORMAT` (`pretty` or `json`)
//!
//! Unset optional variables keep the defaults documented on
//! [`mailsync_domain::Config`].

use std::path::{Path, PathBuf};
use std::str::FromStr;

use mailsync_domain::{Config, LogFormat, MailSyncError, Result};
use tracing::{debug, info};

const CONFIG_FILE_VAR: &str = "MAILSYNC_CONFIG";
const CONFIG_FILE_NAMES: [&str; 4] =
    ["mailsync.toml", "mailsync.json", "config.toml", "config.json"];

/// Load configuration with the fallback strategy described above.
///
/// # Errors
/// Returns `MailSyncError::Config` when the chosen source is unreadable,
/// malformed or fails validation.
pub fn load() -> Result<Config> {
    if let Ok(path) = std::env::var(CONFIG_FILE_VAR) {
        return load_from_file(Some(PathBuf::from(path)));
    }

    match load_from_env() {
        Ok(config) => {
            info!("configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            debug!(error = %e, "environment incomplete, trying config file");
            match probe_config_paths() {
                Some(path) => load_from_file(Some(path)),
                None => {
                    info!("no config file found, using defaults");
                    let config = Config::default();
                    config.validate()?;
                    Ok(config)
                }
            }
        }
    }
}

/// Load configuration from `MAILSYNC_*` environment variables.
///
/// # Errors
/// Returns `MailSyncError::Config` if `MAILSYNC_DB_PATH` is missing or a
/// set variable does not parse.
pub fn load_from_env() -> Result<Config> {
    let mut config = Config::default();
    config.database.path = PathBuf::from(env_var("MAILSYNC_DB_PATH")?);

    if let Some(size) = env_parse("MAILSYNC_DB_POOL_SIZE")? {
        config.database.pool_size = size;
    }

    if let Some(max) = env_parse("MAILSYNC_SYNC_MAX_CONCURRENT")? {
        config.sync.max_concurrent = max;
    }
    if let Some(secs) = env_parse("MAILSYNC_SYNC_INTERVAL")? {
        config.sync.interval_secs = secs;
    }
    config.sync.use_delta = env_bool("MAILSYNC_SYNC_USE_DELTA", config.sync.use_delta);
    config.sync.transmit_after_detect =
        env_bool("MAILSYNC_SYNC_TRANSMIT", config.sync.transmit_after_detect);

    if let Some(secs) = env_parse("MAILSYNC_TOKEN_SAFETY_WINDOW")? {
        config.token.safety_window_secs = secs;
    }

    if let Some(retries) = env_parse("MAILSYNC_TX_MAX_RETRIES")? {
        config.transmission.max_retries = retries;
    }
    if let Some(size) = env_parse("MAILSYNC_TX_BATCH_SIZE")? {
        config.transmission.batch_size = size;
    }
    if let Some(secs) = env_parse("MAILSYNC_TX_POLL_INTERVAL")? {
        config.transmission.poll_interval_secs = secs;
    }
    if let Some(days) = env_parse("MAILSYNC_TX_RETENTION_DAYS")? {
        config.transmission.retention_days = days;
    }

    if let Some(tenant) = env_opt("MAILSYNC_GRAPH_TENANT") {
        config.graph.tenant = tenant;
    }
    if let Some(client_id) = env_opt("MAILSYNC_GRAPH_CLIENT_ID") {
        config.graph.client_id = client_id;
    }
    config.graph.client_secret = env_opt("MAILSYNC_GRAPH_CLIENT_SECRET");
    if let Some(uri) = env_opt("MAILSYNC_GRAPH_REDIRECT_URI") {
        config.graph.redirect_uri = uri;
    }

    if let Some(url) = env_opt("MAILSYNC_SINK_URL") {
        config.sink.base_url = url;
    }
    config.sink.api_key = env_opt("MAILSYNC_SINK_API_KEY");

    if let Some(level) = env_opt("MAILSYNC_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(format) = env_opt("MAILSYNC_LOG_FORMAT") {
        config.logging.format = parse_log_format(&format)?;
    }

    config.validate()?;
    Ok(config)
}

/// Load configuration from a file.
///
/// If `path` is `None`, the probed locations are used. The format is
/// picked from the extension (`.json` or `.toml`).
///
/// # Errors
/// Returns `MailSyncError::Config` if no file is found, the file cannot be
/// read or parsed, or validation fails.
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let path = match path {
        Some(path) => path,
        None => probe_config_paths()
            .ok_or_else(|| MailSyncError::Config("no configuration file found".to_string()))?,
    };

    let contents = std::fs::read_to_string(&path).map_err(|e| {
        MailSyncError::Config(format!("failed to read {}: {e}", path.display()))
    })?;

    let config = parse_config(&path, &contents)?;
    config.validate()?;
    info!(path = %path.display(), "configuration loaded from file");
    Ok(config)
}

fn parse_config(path: &Path, contents: &str) -> Result<Config> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(contents)
            .map_err(|e| MailSyncError::Config(format!("invalid JSON config: {e}"))),
        Some("toml") => toml::from_str(contents)
            .map_err(|e| MailSyncError::Config(format!("invalid TOML config: {e}"))),
        other => Err(MailSyncError::Config(format!(
            "unsupported config extension {other:?} for {}",
            path.display()
        ))),
    }
}

/// Probe the usual locations for a config file.
///
/// Checks the working directory and up to two parents, then the
/// executable's directory and its parent. Returns the first file found.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut dirs = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        dirs.extend(cwd.ancestors().take(3).map(Path::to_path_buf));
    }
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            dirs.extend(exe_dir.ancestors().take(2).map(Path::to_path_buf));
        }
    }

    dirs.iter()
        .flat_map(|dir| CONFIG_FILE_NAMES.iter().map(move |name| dir.join(name)))
        .find(|candidate| candidate.is_file())
}

fn parse_log_format(raw: &str) -> Result<LogFormat> {
    match raw.to_ascii_lowercase().as_str() {
        "pretty" | "text" => Ok(LogFormat::Pretty),
        "json" => Ok(LogFormat::Json),
        other => Err(MailSyncError::Config(format!("unknown log format '{other}'"))),
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key)
        .map_err(|_| MailSyncError::Config(format!("missing required environment variable: {key}")))
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_opt(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| MailSyncError::Config(format!("invalid value for {key}: {e}")))
        })
        .transpose()
}

/// Accepts `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive).
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map_or(default, |s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}
