//! Deadline wrapper for async operations.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{ResilienceError, ResilienceResult};

/// Bounds an operation by a fixed deadline.
///
/// When the deadline passes the inner future is dropped, which cancels any
/// work it had in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout {
    duration: Duration,
}

impl Timeout {
    /// Timeout of `duration` per call
    pub const fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// Deadline applied to each call
    pub const fn duration(&self) -> Duration {
        self.duration
    }

    /// Run `future`, failing with [`ResilienceError::Timeout`] on expiry.
    pub async fn execute<Fut, T, E>(&self, future: Fut) -> ResilienceResult<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        match tokio::time::timeout(self.duration, future).await {
            Ok(result) => result.map_err(|source| ResilienceError::OperationFailed { source }),
            Err(_) => {
                warn!(timeout = ?self.duration, "operation timed out");
                Err(ResilienceError::Timeout { timeout: self.duration })
            }
        }
    }
}
