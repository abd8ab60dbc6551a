//! Retry executor with pluggable retry policies.
//!
//! The executor runs an operation up to `max_attempts` times. After each
//! failure the [`RetryPolicy`] decides whether to try again; delays come from
//! the shared [`Backoff`] calculator. When the error carries a retry-after
//! hint the hint acts as a floor on the computed delay.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::backoff::Backoff;
use crate::error::ErrorClassification;

/// Errors that can occur during retry operations
#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Every attempt failed with a retryable error
    #[error("retry attempts exhausted after {attempts} tries: {source}")]
    Exhausted { attempts: u32, source: E },

    /// The policy refused to retry this error
    #[error("operation failed with non-retryable error: {source}")]
    NonRetryable { source: E },
}

impl<E> RetryError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The last error returned by the operation.
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { source, .. } | Self::NonRetryable { source } => source,
        }
    }

    /// Borrow the last error returned by the operation.
    pub fn last_error(&self) -> &E {
        match self {
            Self::Exhausted { source, .. } | Self::NonRetryable { source } => source,
        }
    }
}

/// Result type for retry operations
pub type RetryResult<T, E> = Result<T, RetryError<E>>;

/// Trait for determining whether an error should be retried
pub trait RetryPolicy<E> {
    /// Decide what to do after `attempt` (1-based) failed with `error`.
    fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision;
}

/// Decision for whether to retry an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the operation with the default backoff delay
    Retry,
    /// Retry, waiting at least this long
    RetryAfter(Duration),
    /// Don't retry the operation
    Stop,
}

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay calculator between attempts
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::exponential(
                Duration::from_millis(500),
                2.0,
                Duration::from_secs(30),
            ),
        }
    }
}

impl RetryConfig {
    /// Create a configuration builder
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".to_string());
        }
        self.backoff.validate()
    }
}

/// Builder for [`RetryConfig`] with fluent API
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    /// Start from the default configuration
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    /// Total attempts, the first call included
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    /// Delay schedule between attempts
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.config.backoff = backoff;
        self
    }

    /// Wait `delay` between every attempt
    pub fn fixed_backoff(mut self, delay: Duration) -> Self {
        self.config.backoff = Backoff::fixed(delay);
        self
    }

    /// Make delays deterministic
    pub fn no_jitter(mut self) -> Self {
        self.config.backoff.jitter = false;
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> Result<RetryConfig, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// The main retry executor
#[derive(Debug, Clone)]
pub struct RetryExecutor<P> {
    config: RetryConfig,
    policy: P,
}

impl<P> RetryExecutor<P> {
    /// Create a new retry executor with the given configuration and policy
    pub fn new(config: RetryConfig, policy: P) -> Self {
        Self { config, policy }
    }

    /// Create with default configuration
    pub fn with_policy(policy: P) -> Self {
        Self::new(RetryConfig::default(), policy)
    }

    /// Configuration in use
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay to wait after `attempt` failed with the given decision.
    fn delay_for(&self, attempt: u32, decision: &RetryDecision) -> Duration {
        let computed = self.config.backoff.delay(attempt);
        match decision {
            RetryDecision::RetryAfter(floor) => computed.max(*floor),
            _ => computed,
        }
    }

    /// Execute an operation with retry logic
    #[instrument(skip(self, operation), fields(max_attempts = self.config.max_attempts))]
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> RetryResult<T, E>
    where
        P: RetryPolicy<E>,
        E: std::error::Error + Send + Sync + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            debug!(attempt, max_attempts, "executing operation");

            let error = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let decision = self.policy.should_retry(&error, attempt);
            if decision == RetryDecision::Stop {
                debug!(attempt, error = %error, "retry policy stopped retrying");
                return Err(RetryError::NonRetryable { source: error });
            }

            if attempt >= max_attempts {
                warn!(attempts = attempt, error = %error, "all retry attempts exhausted");
                return Err(RetryError::Exhausted { attempts: attempt, source: error });
            }

            let delay = self.delay_for(attempt, &decision);
            warn!(attempt, ?delay, error = %error, "operation failed, retrying");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Pre-defined retry policies for common scenarios
pub mod policies {
    use super::{fmt, ErrorClassification, RetryDecision, RetryPolicy};

    /// Retries errors their classification marks as retryable, honouring
    /// retry-after hints.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct ClassifiedRetry;

    impl<E: ErrorClassification> RetryPolicy<E> for ClassifiedRetry {
        fn should_retry(&self, error: &E, _attempt: u32) -> RetryDecision {
            if !error.is_retryable() {
                return RetryDecision::Stop;
            }
            error.retry_after().map_or(RetryDecision::Retry, RetryDecision::RetryAfter)
        }
    }

    /// Always retry policy - retries on any error
    #[derive(Debug, Clone, Copy, Default)]
    pub struct AlwaysRetry;

    impl<E> RetryPolicy<E> for AlwaysRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> RetryDecision {
            RetryDecision::Retry
        }
    }

    /// Never retry policy - never retries
    #[derive(Debug, Clone, Copy, Default)]
    pub struct NeverRetry;

    impl<E> RetryPolicy<E> for NeverRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> RetryDecision {
            RetryDecision::Stop
        }
    }

    /// Retries exactly the errors the predicate accepts
    pub struct PredicateRetry<F> {
        predicate: F,
    }

    impl<F> PredicateRetry<F> {
        /// Retry whenever `predicate` returns true
        pub fn new(predicate: F) -> Self {
            Self { predicate }
        }
    }

    impl<F> fmt::Debug for PredicateRetry<F> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("PredicateRetry").finish_non_exhaustive()
        }
    }

    impl<F, E> RetryPolicy<E> for PredicateRetry<F>
    where
        F: Fn(&E) -> bool,
    {
        fn should_retry(&self, error: &E, _attempt: u32) -> RetryDecision {
            if (self.predicate)(error) {
                RetryDecision::Retry
            } else {
                RetryDecision::Stop
            }
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the retry executor and policies

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::policies::{AlwaysRetry, ClassifiedRetry, NeverRetry, PredicateRetry};
    use super::*;
    use crate::error::ErrorSeverity;

    #[derive(Debug, Error, Clone, PartialEq)]
    enum FetchError {
        #[error("connection reset")]
        Reset,
        #[error("throttled")]
        Throttled(Duration),
        #[error("bad request")]
        BadRequest,
    }

    impl ErrorClassification for FetchError {
        fn is_retryable(&self) -> bool {
            !matches!(self, Self::BadRequest)
        }

        fn severity(&self) -> ErrorSeverity {
            ErrorSeverity::Warning
        }

        fn is_critical(&self) -> bool {
            false
        }

        fn retry_after(&self) -> Option<Duration> {
            match self {
                Self::Throttled(delay) => Some(*delay),
                _ => None,
            }
        }
    }

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig::builder()
            .max_attempts(max_attempts)
            .fixed_backoff(Duration::from_millis(1))
            .build()
            .expect("valid config")
    }

    /// Validates `RetryExecutor::execute` for a transient failure.
    ///
    /// Assertions:
    /// - Fails twice then succeeds on the third attempt.
    /// - The operation ran exactly three times.
    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let executor = RetryExecutor::new(fast_config(3), ClassifiedRetry);
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let result = executor
            .execute(|| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(FetchError::Reset)
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.expect("third attempt succeeds"), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    /// Validates attempt exhaustion.
    ///
    /// Assertions:
    /// - Returns `Exhausted` with the attempt count and the last error.
    #[tokio::test]
    async fn exhausts_attempts() {
        let executor = RetryExecutor::new(fast_config(4), AlwaysRetry);
        let calls = AtomicU32::new(0);

        let result: RetryResult<(), FetchError> = executor
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FetchError::Reset) }
            })
            .await;

        match result {
            Err(RetryError::Exhausted { attempts, source }) => {
                assert_eq!(attempts, 4);
                assert_eq!(source, FetchError::Reset);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    /// Validates that non-retryable errors stop immediately.
    ///
    /// Assertions:
    /// - A single attempt is made and `NonRetryable` is returned.
    #[tokio::test]
    async fn stops_on_non_retryable_error() {
        let executor = RetryExecutor::new(fast_config(5), ClassifiedRetry);
        let calls = AtomicU32::new(0);

        let result: RetryResult<(), FetchError> = executor
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FetchError::BadRequest) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::NonRetryable { source: FetchError::BadRequest })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Validates that a retry-after hint is a floor on the delay.
    ///
    /// Assertions:
    /// - With a 1ms backoff and a 5s hint, at least 5s of (paused) time
    ///   passes before the second attempt.
    #[tokio::test(start_paused = true)]
    async fn retry_after_hint_is_a_floor() {
        let executor = RetryExecutor::new(fast_config(2), ClassifiedRetry);
        let started = tokio::time::Instant::now();
        let calls = AtomicU32::new(0);

        let result = executor
            .execute(|| {
                let first = calls.fetch_add(1, Ordering::SeqCst) == 0;
                async move {
                    if first {
                        Err(FetchError::Throttled(Duration::from_secs(5)))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn predicate_policy_selects_retryable_errors() {
        let executor = RetryExecutor::new(
            fast_config(3),
            PredicateRetry::new(|e: &FetchError| *e == FetchError::Reset),
        );
        let calls = AtomicU32::new(0);

        let result: RetryResult<(), FetchError> = executor
            .execute(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(if n == 0 { FetchError::Reset } else { FetchError::BadRequest }) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::NonRetryable { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn policy_decisions() {
        assert_eq!(AlwaysRetry.should_retry(&FetchError::BadRequest, 1), RetryDecision::Retry);
        assert_eq!(NeverRetry.should_retry(&FetchError::Reset, 1), RetryDecision::Stop);
        assert_eq!(
            ClassifiedRetry.should_retry(&FetchError::Throttled(Duration::from_secs(2)), 1),
            RetryDecision::RetryAfter(Duration::from_secs(2))
        );
    }

    #[test]
    fn config_validation() {
        assert!(RetryConfig::builder().max_attempts(0).build().is_err());
        assert_eq!(RetryConfig::default().max_attempts, 3);
    }

    #[test]
    fn retry_error_exposes_last_error() {
        let err = RetryError::Exhausted { attempts: 3, source: FetchError::Reset };
        assert_eq!(err.to_string(), "retry attempts exhausted after 3 tries: connection reset");
        assert_eq!(err.into_inner(), FetchError::Reset);
    }
}
