//! Resilience patterns for calls to remote dependencies
//!
//! - **Circuit Breaker**: stops calling a dependency that keeps failing and
//!   probes it again after a recovery timeout
//! - **Backoff**: the one delay calculator used by every retry path
//! - **Retry**: bounded retries driven by a [`RetryPolicy`]
//! - **Bulkhead**: caps how many calls run at once
//! - **Timeout**: bounds a single call
//! - **Registry**: one breaker per dependency name, shared by all callers
//! - **Policy**: the four composed for one dependency
//!
//! Everything is generic over the operation error type. Errors that
//! implement [`ErrorClassification`](crate::ErrorClassification) get
//! retry and breaker decisions for free through [`ResiliencePolicy`].
//!
//! Time-dependent behavior reads from a [`Clock`] so tests can use
//! [`MockClock`] instead of sleeping.

pub mod backoff;
pub mod bulkhead;
pub mod circuit_breaker;
pub mod policy;
pub mod registry;
pub mod retry;
pub mod timeout;

pub use backoff::{Backoff, BackoffStrategy};
pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadMetrics};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitSnapshot,
    CircuitState, Clock, ConfigError, ConfigResult, MockClock, SystemClock,
};
pub use policy::ResiliencePolicy;
pub use registry::BreakerRegistry;
pub use retry::{
    policies, RetryConfig, RetryConfigBuilder, RetryDecision, RetryError, RetryExecutor,
    RetryPolicy, RetryResult,
};
pub use timeout::Timeout;

pub use crate::error::{ResilienceError, ResilienceResult};
