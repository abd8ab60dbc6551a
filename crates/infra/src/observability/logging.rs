//! `tracing-subscriber` installation

use mailsync_domain::{LogFormat, LoggingConfig, MailSyncError, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Build the event filter: `RUST_LOG` when set, otherwise `config.level`.
///
/// # Errors
/// Returns `MailSyncError::Config` if the configured level is not a valid
/// filter directive.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level)
        .map_err(|e| MailSyncError::Config(format!("invalid log level '{}': {e}", config.level)))
}

/// Install the global subscriber.
///
/// Returns `Ok(false)` when a subscriber was already installed, so calling
/// this twice is harmless.
///
/// # Errors
/// Returns `MailSyncError::Config` for an invalid level.
pub fn init_tracing(config: &LoggingConfig) -> Result<bool> {
    let filter = build_filter(config)?;
    let registry = Registry::default().with(filter);

    let installed = match config.format {
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init().is_ok(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true).with_span_list(false))
            .try_init()
            .is_ok(),
    };

    if installed {
        tracing::debug!(level = %config.level, format = ?config.format, "tracing initialised");
    }
    Ok(installed)
}
