//! Modular common utilities shared across mailsync crates.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: error classification and the generic resilience error
//! - `runtime`: async resilience kit (circuit breaker, retry, bulkhead,
//!   timeout, breaker registry, composed policy)
//! - `observability`: tracing (pulled in by `runtime`)

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod error;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod resilience;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "foundation")]
pub use error::{ErrorClassification, ErrorSeverity, ResilienceError, ResilienceResult};
#[cfg(feature = "runtime")]
pub use resilience::{
    Backoff, BackoffStrategy, BreakerRegistry, Bulkhead, BulkheadConfig, CircuitBreaker,
    CircuitBreakerConfig, CircuitSnapshot, CircuitState, Clock, MockClock, ResiliencePolicy,
    RetryConfig, RetryDecision, RetryError, RetryExecutor, RetryPolicy,
    SystemClock, Timeout,
};
