//! Error classification shared by every mailsync crate.
//!
//! Two pieces live here:
//!
//! 1. **`ErrorClassification`**: the interface the resilience kit uses to
//!    decide whether a failure is retried, whether it counts against a
//!    circuit breaker, and how long a caller asked us to back off.
//! 2. **`ResilienceError<E>`**: the wrapper returned by the resilience
//!    primitives. It preserves the operation error `E` and adds the
//!    rejections the primitives themselves produce (open circuit, timeout,
//!    full bulkhead).
//!
//! Both are in the foundation tier so that domain error types can implement
//! the trait and convert from `ResilienceError` without pulling in tokio.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Standard interface for classifying errors by their characteristics.
pub trait ErrorClassification {
    /// Check if this error is retryable
    ///
    /// Retryable errors are transient: network failures, timeouts, rate
    /// limiting and server-side faults.
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring operator attention
    fn is_critical(&self) -> bool;

    /// Get the suggested retry delay if applicable
    ///
    /// Returns `Some(Duration)` when the remote side specified one (for
    /// example a `Retry-After` header). Callers treat it as a floor on the
    /// computed backoff.
    fn retry_after(&self) -> Option<Duration>;

    /// Whether this failure says something about the health of the remote
    /// dependency and should therefore be recorded by a circuit breaker.
    ///
    /// Defaults to [`is_retryable`](Self::is_retryable): a rejected request
    /// (4xx) proves the dependency is reachable, a timeout does not.
    fn counts_toward_breaker(&self) -> bool {
        self.is_retryable()
    }
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Errors that can occur in resilience operations
///
/// Generic over the underlying operation error type `E`, preserving it in
/// [`ResilienceError::OperationFailed`].
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Circuit breaker is open, rejecting calls
    #[error("circuit '{name}' is open, rejecting calls")]
    CircuitOpen { name: String },

    /// Operation timed out
    #[error("operation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// Bulkhead capacity exceeded
    #[error("bulkhead capacity exceeded: {capacity} concurrent operations")]
    BulkheadFull { capacity: usize },

    /// The underlying operation failed
    #[error(transparent)]
    OperationFailed { source: E },

    /// Configuration error
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },
}

impl<E> ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Returns the wrapped operation error, if any.
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            Self::OperationFailed { source } => Some(source),
            _ => None,
        }
    }

    /// Maps the operation error into another type, keeping the resilience
    /// variants untouched.
    pub fn map_operation<F, E2>(self, f: F) -> ResilienceError<E2>
    where
        F: FnOnce(E) -> E2,
        E2: std::error::Error + Send + Sync + 'static,
    {
        match self {
            Self::CircuitOpen { name } => ResilienceError::CircuitOpen { name },
            Self::Timeout { timeout } => ResilienceError::Timeout { timeout },
            Self::BulkheadFull { capacity } => ResilienceError::BulkheadFull { capacity },
            Self::OperationFailed { source } => ResilienceError::OperationFailed { source: f(source) },
            Self::InvalidConfiguration { message } => {
                ResilienceError::InvalidConfiguration { message }
            }
        }
    }
}

impl<E> ErrorClassification for ResilienceError<E>
where
    E: std::error::Error + ErrorClassification + Send + Sync + 'static,
{
    fn is_retryable(&self) -> bool {
        match self {
            // Timeouts are transient by definition.
            Self::Timeout { .. } => true,
            Self::CircuitOpen { .. } | Self::BulkheadFull { .. } => false,
            Self::OperationFailed { source } => source.is_retryable(),
            Self::InvalidConfiguration { .. } => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Timeout { .. } | Self::BulkheadFull { .. } => ErrorSeverity::Warning,
            Self::CircuitOpen { .. } => ErrorSeverity::Error,
            Self::OperationFailed { source } => source.severity(),
            Self::InvalidConfiguration { .. } => ErrorSeverity::Critical,
        }
    }

    fn is_critical(&self) -> bool {
        match self {
            Self::OperationFailed { source } => source.is_critical(),
            Self::InvalidConfiguration { .. } => true,
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        self.operation_error().and_then(ErrorClassification::retry_after)
    }

    fn counts_toward_breaker(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::OperationFailed { source } => source.counts_toward_breaker(),
            _ => false,
        }
    }
}

/// Result type for resilience operations
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;
