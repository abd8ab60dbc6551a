//! Bulkhead pattern for limiting concurrent operations
//!
//! A bulkhead holds `max_concurrent` permits. Each operation holds one permit
//! for its whole duration, so no more than `max_concurrent` operations run at
//! once. Callers that cannot get a permit within `acquire_timeout` are
//! rejected with [`ResilienceError::BulkheadFull`].

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, instrument, warn};

use crate::error::{ResilienceError, ResilienceResult};

/// Configuration for bulkhead behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkheadConfig {
    /// Maximum number of concurrent operations allowed
    pub max_concurrent: usize,
    /// How long to wait for a permit. `None` waits indefinitely, zero fails
    /// immediately when the bulkhead is full.
    pub acquire_timeout: Option<Duration>,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self { max_concurrent: 10, acquire_timeout: None }
    }
}

impl BulkheadConfig {
    /// Capacity `max_concurrent`, waiting without a deadline
    pub fn new(max_concurrent: usize) -> Self {
        Self { max_concurrent, ..Self::default() }
    }

    /// Reject callers that wait longer than `timeout` for a permit
    #[must_use]
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent == 0 {
            return Err("max_concurrent must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Metrics for bulkhead monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkheadMetrics {
    /// Permits handed out since creation
    pub total_acquired: u64,
    /// Callers turned away because no permit became free in time
    pub rejected: u64,
    /// Permits currently held
    pub in_flight: usize,
    pub max_concurrent: usize,
}

impl BulkheadMetrics {
    /// Check if the bulkhead is at capacity
    pub fn is_at_capacity(&self) -> bool {
        self.in_flight >= self.max_concurrent
    }
}

/// Concurrency limiter shared by clones
#[derive(Debug, Clone)]
pub struct Bulkhead {
    config: BulkheadConfig,
    semaphore: Arc<Semaphore>,
    total_acquired: Arc<AtomicU64>,
    rejected: Arc<AtomicU64>,
}

impl Bulkhead {
    /// Create a bulkhead with the given configuration
    pub fn new(config: BulkheadConfig) -> Result<Self, String> {
        config.validate()?;
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            config,
            total_acquired: Arc::new(AtomicU64::new(0)),
            rejected: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Create a bulkhead that waits indefinitely for permits
    pub fn with_capacity(max_concurrent: usize) -> Result<Self, String> {
        Self::new(BulkheadConfig::new(max_concurrent))
    }

    /// Maximum concurrent permits
    pub fn capacity(&self) -> usize {
        self.config.max_concurrent
    }

    /// Acquire a permit, honouring the configured acquire timeout.
    ///
    /// The permit is owned so it can move into a spawned task; the slot is
    /// released when it is dropped.
    pub async fn acquire<E>(&self) -> ResilienceResult<OwnedSemaphorePermit, E>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        let permit = match self.config.acquire_timeout {
            Some(timeout) if timeout.is_zero() => semaphore.try_acquire_owned().ok(),
            Some(timeout) => tokio::time::timeout(timeout, semaphore.acquire_owned())
                .await
                .ok()
                .and_then(Result::ok),
            None => semaphore.acquire_owned().await.ok(),
        };

        if let Some(permit) = permit {
            self.total_acquired.fetch_add(1, Ordering::Relaxed);
            Ok(permit)
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(capacity = self.config.max_concurrent, "bulkhead full, rejecting operation");
            Err(ResilienceError::BulkheadFull { capacity: self.config.max_concurrent })
        }
    }

    /// Execute an operation while holding a permit
    #[instrument(skip(self, operation), fields(capacity = self.config.max_concurrent))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let _permit = self.acquire::<E>().await?;
        debug!(in_flight = self.in_flight(), "bulkhead permit acquired");
        operation().await.map_err(|source| ResilienceError::OperationFailed { source })
    }

    /// Number of permits currently held
    pub fn in_flight(&self) -> usize {
        self.config.max_concurrent.saturating_sub(self.semaphore.available_permits())
    }

    /// Current metrics
    pub fn metrics(&self) -> BulkheadMetrics {
        BulkheadMetrics {
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
            max_concurrent: self.config.max_concurrent,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use thiserror::Error;

    use super::*;

    #[derive(Debug, Error)]
    #[error("work failed")]
    struct WorkError;

    /// Validates that the bulkhead caps concurrency.
    ///
    /// Assertions:
    /// - With capacity 2 and 8 concurrent tasks, the observed peak is 2.
    /// - Every task eventually runs.
    #[tokio::test]
    async fn caps_concurrent_operations() {
        let bulkhead = Bulkhead::with_capacity(2).expect("valid bulkhead");
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let bulkhead = bulkhead.clone();
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                bulkhead
                    .execute(|| async {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, WorkError>(())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert!(handle.await.expect("task joins").is_ok());
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(bulkhead.metrics().total_acquired, 8);
        assert_eq!(bulkhead.in_flight(), 0);
    }

    /// Validates rejection when no permit frees up in time.
    ///
    /// Assertions:
    /// - A zero acquire timeout rejects immediately with `BulkheadFull`.
    #[tokio::test]
    async fn rejects_when_full_with_zero_timeout() {
        let bulkhead =
            Bulkhead::new(BulkheadConfig::new(1).with_acquire_timeout(Duration::ZERO))
                .expect("valid bulkhead");
        let held = bulkhead.acquire::<WorkError>().await.expect("first permit");

        let result: ResilienceResult<(), WorkError> = bulkhead.execute(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(ResilienceError::BulkheadFull { capacity: 1 })));
        assert_eq!(bulkhead.metrics().rejected, 1);
        assert!(bulkhead.metrics().is_at_capacity());

        drop(held);
        assert_eq!(bulkhead.in_flight(), 0);
    }

    #[tokio::test]
    async fn wraps_operation_errors() {
        let bulkhead = Bulkhead::with_capacity(1).expect("valid bulkhead");
        let result: ResilienceResult<(), WorkError> =
            bulkhead.execute(|| async { Err(WorkError) }).await;
        assert!(matches!(result, Err(ResilienceError::OperationFailed { .. })));
    }

    #[test]
    fn zero_capacity_is_invalid() {
        assert!(Bulkhead::with_capacity(0).is_err());
    }
}
