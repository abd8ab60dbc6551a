//! Resilience policies for the three remote dependencies

use mailsync_common::{
    Backoff, BackoffStrategy, BreakerRegistry, Bulkhead, CircuitBreakerConfig, ResiliencePolicy,
    RetryConfig,
};
use mailsync_domain::constants::{DEPENDENCY_IDENTITY, DEPENDENCY_MAILBOX, DEPENDENCY_SINK};
use mailsync_domain::{
    DependencySettings, MailSyncError, ResilienceSettings, Result, TransmissionConfig,
};

/// Build the composed policy for dependency `name`.
///
/// The breaker comes from `registry`, so every policy built for the same name
/// observes and feeds the same circuit.
pub fn build_policy(
    name: &str,
    settings: &ResilienceSettings,
    registry: &BreakerRegistry,
) -> Result<ResiliencePolicy> {
    let breaker_config = CircuitBreakerConfig::builder()
        .failure_threshold(settings.failure_threshold)
        .recovery_timeout(settings.recovery_timeout())
        .success_threshold(settings.success_threshold)
        .build()
        .map_err(|e| config_error(name, e))?;
    let breaker = registry.get_or_create(name, breaker_config).map_err(|e| config_error(name, e))?;

    let strategy = BackoffStrategy::parse(&settings.strategy).ok_or_else(|| {
        MailSyncError::Config(format!("{name}: unknown backoff strategy '{}'", settings.strategy))
    })?;
    let backoff = Backoff {
        strategy,
        base_delay: std::time::Duration::from_millis(settings.base_delay_ms),
        max_delay: std::time::Duration::from_millis(settings.max_delay_ms),
        multiplier: settings.multiplier,
        jitter: settings.jitter,
    };
    let retry = RetryConfig::builder()
        .max_attempts(settings.max_attempts)
        .backoff(backoff)
        .build()
        .map_err(|e| config_error(name, e))?;
    let bulkhead = Bulkhead::with_capacity(settings.max_concurrent).map_err(|e| config_error(name, e))?;

    Ok(ResiliencePolicy::new(breaker, retry, settings.call_timeout()).with_bulkhead(bulkhead))
}

/// Per-record backoff for the transmission queue
pub fn transmission_backoff(config: &TransmissionConfig) -> Backoff {
    Backoff {
        strategy: BackoffStrategy::Exponential,
        base_delay: std::time::Duration::from_secs(config.retry_base_delay_secs),
        max_delay: std::time::Duration::from_secs(config.retry_max_delay_secs),
        multiplier: config.retry_multiplier,
        jitter: config.jitter,
    }
}

fn config_error(name: &str, error: impl std::fmt::Display) -> MailSyncError {
    MailSyncError::Config(format!("resilience.{name}: {error}"))
}

/// One policy per remote dependency, sharing a breaker registry
#[derive(Debug, Clone)]
pub struct DependencyPolicies {
    pub mailbox: ResiliencePolicy,
    pub identity: ResiliencePolicy,
    pub sink: ResiliencePolicy,
}

impl DependencyPolicies {
    /// Build the three policies, registering their breakers in `registry`
    pub fn from_settings(settings: &DependencySettings, registry: &BreakerRegistry) -> Result<Self> {
        Ok(Self {
            mailbox: build_policy(DEPENDENCY_MAILBOX, &settings.mailbox, registry)?,
            identity: build_policy(DEPENDENCY_IDENTITY, &settings.identity, registry)?,
            sink: build_policy(DEPENDENCY_SINK, &settings.sink, registry)?,
        })
    }
}
