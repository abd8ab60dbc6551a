//! Composed resilience wrapper for calls to one remote dependency.
//!
//! Layering, outermost first:
//!
//! ```text
//! Bulkhead permit
//!   └─ RetryExecutor loop (ClassifiedRetry)
//!        └─ per attempt: CircuitBreaker admission
//!             └─ Timeout
//!                  └─ operation
//! ```
//!
//! The breaker sees every attempt, so a dependency that keeps failing opens
//! the circuit in the middle of a retry loop and the loop stops with
//! `CircuitOpen`. Only failures whose classification counts toward the
//! breaker are recorded; rejected requests release the slot instead.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, instrument};

use super::bulkhead::Bulkhead;
use super::circuit_breaker::{CircuitBreaker, CircuitSnapshot, Clock, SystemClock};
use super::retry::{policies::ClassifiedRetry, RetryConfig, RetryError, RetryExecutor};
use super::timeout::Timeout;
use crate::error::{ErrorClassification, ResilienceError, ResilienceResult};

/// Circuit breaker, retry, timeout and optional bulkhead for one dependency
#[derive(Debug, Clone)]
pub struct ResiliencePolicy<C: Clock = SystemClock> {
    breaker: CircuitBreaker<C>,
    retry: RetryExecutor<ClassifiedRetry>,
    timeout: Timeout,
    bulkhead: Option<Bulkhead>,
}

impl<C: Clock> ResiliencePolicy<C> {
    /// Combine a breaker, a retry schedule and a per-attempt timeout
    pub fn new(breaker: CircuitBreaker<C>, retry: RetryConfig, timeout: Duration) -> Self {
        Self {
            breaker,
            retry: RetryExecutor::new(retry, ClassifiedRetry),
            timeout: Timeout::new(timeout),
            bulkhead: None,
        }
    }

    /// Gate every call (including all of its retries) behind `bulkhead`.
    #[must_use]
    pub fn with_bulkhead(mut self, bulkhead: Bulkhead) -> Self {
        self.bulkhead = Some(bulkhead);
        self
    }

    /// Dependency name, shared with the breaker
    pub fn name(&self) -> &str {
        self.breaker.name()
    }

    /// Breaker shared through the registry
    pub fn breaker(&self) -> &CircuitBreaker<C> {
        &self.breaker
    }

    /// Current breaker state
    pub fn snapshot(&self) -> CircuitSnapshot {
        self.breaker.snapshot()
    }

    /// Run `operation` under the full policy.
    ///
    /// The returned error is the last attempt's error: an operation failure,
    /// a timeout, an open circuit or a full bulkhead.
    #[instrument(skip(self, operation), fields(dependency = %self.breaker.name()))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + ErrorClassification + Send + Sync + 'static,
    {
        let _permit = match &self.bulkhead {
            Some(bulkhead) => Some(bulkhead.acquire::<E>().await?),
            None => None,
        };

        let this = self;
        let op = &operation;
        this.retry.execute(move || this.attempt(op)).await.map_err(RetryError::into_inner)
    }

    async fn attempt<F, Fut, T, E>(&self, operation: &F) -> ResilienceResult<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + ErrorClassification + Send + Sync + 'static,
    {
        if !self.breaker.try_acquire() {
            debug!("circuit open, skipping attempt");
            return Err(ResilienceError::CircuitOpen { name: self.breaker.name().to_string() });
        }

        let result = self.timeout.execute(operation()).await;
        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(error) if error.counts_toward_breaker() => self.breaker.record_failure(),
            Err(_) => self.breaker.release(),
        }
        result
    }
}
