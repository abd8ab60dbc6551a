//! Error types used throughout the mailsync crates

use std::time::Duration;

use mailsync_common::{ErrorClassification, ErrorSeverity, ResilienceError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for mailsync
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum MailSyncError {
    /// Malformed input to an orchestration call
    #[error("Validation error: {0}")]
    Validation(String),

    /// 401/403 from a remote API; the credential may just need a refresh
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The refresh credential was revoked or is invalid
    #[error("Invalid grant: {0}")]
    InvalidGrant(String),

    #[error("Rate limited: {message}")]
    RateLimited { message: String, retry_after_secs: Option<u64> },

    /// Network failure or 5xx
    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Circuit open: {0}")]
    CircuitOpen(String),

    /// 4xx other than 401/403/429
    #[error("Rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// Permanently broken account configuration
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// A compare-and-set lost against a concurrent writer
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for mailsync operations
pub type Result<T> = std::result::Result<T, MailSyncError>;

/// Coarse error category reported per account and per record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Authentication,
    RateLimited,
    Transient,
    Rejected,
    Fatal,
    Internal,
}

crate::impl_domain_status_conversions!(ErrorKind {
    Validation => "validation",
    Authentication => "authentication",
    RateLimited => "rate_limited",
    Transient => "transient",
    Rejected => "rejected",
    Fatal => "fatal",
    Internal => "internal",
});

impl MailSyncError {
    /// Rate limit, keeping the provider's `Retry-After` when present
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimited { message: message.into(), retry_after_secs: retry_after.map(|d| d.as_secs()) }
    }

    /// Category used in reports
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Authentication(_) => ErrorKind::Authentication,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Transient(_) | Self::Timeout(_) | Self::CircuitOpen(_) | Self::Conflict(_) => {
                ErrorKind::Transient
            }
            Self::Rejected { .. } => ErrorKind::Rejected,
            Self::InvalidGrant(_) | Self::Fatal(_) => ErrorKind::Fatal,
            Self::Database(_) | Self::Config(_) | Self::NotFound(_) | Self::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Errors that take an account out of automatic sync until an operator
    /// re-authorizes or fixes it.
    pub fn is_fatal_for_account(&self) -> bool {
        matches!(self, Self::InvalidGrant(_) | Self::Fatal(_))
    }
}

impl ErrorClassification for MailSyncError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient(_) | Self::Timeout(_))
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Conflict(_) => ErrorSeverity::Info,
            Self::Validation(_)
            | Self::Authentication(_)
            | Self::RateLimited { .. }
            | Self::Transient(_)
            | Self::Timeout(_)
            | Self::CircuitOpen(_)
            | Self::NotFound(_) => ErrorSeverity::Warning,
            Self::InvalidGrant(_)
            | Self::Rejected { .. }
            | Self::Database(_)
            | Self::Internal(_) => ErrorSeverity::Error,
            Self::Fatal(_) | Self::Config(_) => ErrorSeverity::Critical,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::Fatal(_) | Self::Config(_))
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after_secs, .. } => retry_after_secs.map(Duration::from_secs),
            _ => None,
        }
    }
}

impl From<ResilienceError<Self>> for MailSyncError {
    fn from(error: ResilienceError<Self>) -> Self {
        match error {
            ResilienceError::CircuitOpen { name } => {
                Self::CircuitOpen(format!("dependency '{name}' is unavailable"))
            }
            ResilienceError::Timeout { timeout } => {
                Self::Timeout(format!("call exceeded {}ms", timeout.as_millis()))
            }
            ResilienceError::BulkheadFull { capacity } => {
                Self::Transient(format!("too many concurrent calls (capacity {capacity})"))
            }
            ResilienceError::OperationFailed { source } => source,
            ResilienceError::InvalidConfiguration { message } => Self::Config(message),
        }
    }
}

impl From<serde_json::Error> for MailSyncError {
    fn from(error: serde_json::Error) -> Self {
        Self::Internal(format!("serialization failed: {error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates `MailSyncError` classification for the error taxonomy.
    ///
    /// Assertions:
    /// - Rate limits, transient failures and timeouts retry and count toward
    ///   the breaker.
    /// - Authentication, rejections and invalid grants do neither.
    #[test]
    fn classification_follows_taxonomy() {
        let retried = [
            MailSyncError::rate_limited("slow down", Some(Duration::from_secs(30))),
            MailSyncError::Transient("503".into()),
            MailSyncError::Timeout("30s".into()),
        ];
        for err in &retried {
            assert!(err.is_retryable(), "{err} should retry");
            assert!(err.counts_toward_breaker(), "{err} should count");
        }

        let not_retried = [
            MailSyncError::Authentication("401".into()),
            MailSyncError::Rejected { status: 422, message: "bad payload".into() },
            MailSyncError::InvalidGrant("revoked".into()),
            MailSyncError::Validation("max_concurrent".into()),
            MailSyncError::CircuitOpen("sink-api".into()),
        ];
        for err in &not_retried {
            assert!(!err.is_retryable(), "{err} should not retry");
            assert!(!err.counts_toward_breaker(), "{err} should not count");
        }
    }

    #[test]
    fn retry_after_comes_from_rate_limit() {
        let err = MailSyncError::rate_limited("429", Some(Duration::from_secs(12)));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(12)));
        assert_eq!(MailSyncError::Transient("x".into()).retry_after(), None);
    }

    /// Validates conversion from resilience errors.
    ///
    /// Assertions:
    /// - Operation failures unwrap to the original error.
    /// - Open circuits and timeouts map to their own variants.
    #[test]
    fn converts_from_resilience_error() {
        let inner = MailSyncError::Rejected { status: 400, message: "nope".into() };
        let unwrapped: MailSyncError =
            ResilienceError::OperationFailed { source: inner.clone() }.into();
        assert_eq!(unwrapped, inner);

        let open: MailSyncError =
            ResilienceError::<MailSyncError>::CircuitOpen { name: "sink-api".into() }.into();
        assert!(matches!(open, MailSyncError::CircuitOpen(ref m) if m.contains("sink-api")));

        let timeout: MailSyncError =
            ResilienceError::<MailSyncError>::Timeout { timeout: Duration::from_secs(2) }.into();
        assert_eq!(timeout.kind(), ErrorKind::Transient);
    }

    #[test]
    fn kinds_and_account_fatality() {
        assert_eq!(MailSyncError::InvalidGrant("x".into()).kind(), ErrorKind::Fatal);
        assert!(MailSyncError::InvalidGrant("x".into()).is_fatal_for_account());
        assert!(!MailSyncError::Authentication("x".into()).is_fatal_for_account());
        assert_eq!(ErrorKind::RateLimited.to_string(), "rate_limited");
    }

    #[test]
    fn serializes_with_type_tag() {
        let json = serde_json::to_value(MailSyncError::NotFound("account 7".into()))
            .expect("serializes");
        assert_eq!(json["type"], "NotFound");
        assert_eq!(json["message"], "account 7");
    }
}
