//! Periodic drain of the transmission queue.
//!
//! Every tick first returns records stranded `in_progress` by a dead worker
//! to the queue, then drains one batch. Old terminal records are cleaned up
//! on a slower cadence.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mailsync_core::TransmissionPipeline;
//! use mailsync_infra::workers::{TransmissionWorker, TransmissionWorkerConfig};
//!
//! # async fn example(pipeline: Arc<TransmissionPipeline>) -> mailsync_infra::workers::WorkerResult<()> {
//! let mut worker = TransmissionWorker::new(pipeline, TransmissionWorkerConfig::default());
//! worker.start()?;
//! // ... application runs ...
//! worker.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use mailsync_core::TransmissionPipeline;
use mailsync_domain::TransmissionConfig;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::error::{WorkerError, WorkerResult};

/// Settings for the drain loop
#[derive(Debug, Clone)]
pub struct TransmissionWorkerConfig {
    /// Pause between drain passes
    pub poll_interval: Duration,
    /// Records drained per pass
    pub batch_size: usize,
    /// Upper bound on one drain pass
    pub processing_timeout: Duration,
    /// `in_progress` records older than this are requeued
    pub stale_after: Duration,
    /// Terminal records older than this are deleted; `None` disables cleanup
    pub retention: Option<Duration>,
    /// Minimum time between cleanups
    pub cleanup_interval: Duration,
    /// Join timeout when stopping
    pub join_timeout: Duration,
}

impl Default for TransmissionWorkerConfig {
    fn default() -> Self {
        Self::from(&TransmissionConfig::default())
    }
}

impl From<&TransmissionConfig> for TransmissionWorkerConfig {
    fn from(config: &TransmissionConfig) -> Self {
        let retention_secs = u64::from(config.retention_days) * 24 * 60 * 60;
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            batch_size: config.batch_size,
            processing_timeout: Duration::from_secs(300),
            stale_after: Duration::from_secs(600),
            retention: (retention_secs > 0).then(|| Duration::from_secs(retention_secs)),
            cleanup_interval: Duration::from_secs(60 * 60),
            join_timeout: Duration::from_secs(10),
        }
    }
}

/// Background drainer for a [`TransmissionPipeline`]
pub struct TransmissionWorker {
    pipeline: Arc<TransmissionPipeline>,
    config: TransmissionWorkerConfig,
    cancellation: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
}

impl TransmissionWorker {
    /// Worker that has not started yet
    pub fn new(pipeline: Arc<TransmissionPipeline>, config: TransmissionWorkerConfig) -> Self {
        Self { pipeline, config, cancellation: CancellationToken::new(), task_handle: None }
    }

    /// Spawn the drain loop. The first pass runs immediately.
    ///
    /// # Errors
    /// [`WorkerError::AlreadyRunning`] if the loop is active.
    #[instrument(skip(self))]
    pub fn start(&mut self) -> WorkerResult<()> {
        if self.is_running() {
            return Err(WorkerError::AlreadyRunning);
        }

        self.cancellation = CancellationToken::new();
        let pipeline = Arc::clone(&self.pipeline);
        let config = self.config.clone();
        let cancel = self.cancellation.clone();

        self.task_handle = Some(tokio::spawn(Self::process_loop(pipeline, config, cancel)));
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            "transmission worker started"
        );
        Ok(())
    }

    /// Cancel the loop and wait for it to finish.
    ///
    /// A drain pass in flight is abandoned at its next await point; claimed
    /// records it leaves `in_progress` are recovered by a later pass.
    ///
    /// # Errors
    /// [`WorkerError::NotRunning`], [`WorkerError::Timeout`] or
    /// [`WorkerError::TaskJoinFailed`].
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> WorkerResult<()> {
        let handle = self.task_handle.take().ok_or(WorkerError::NotRunning)?;
        self.cancellation.cancel();

        let timeout = self.config.join_timeout;
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => {
                info!("transmission worker stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(error = %e, "transmission worker task panicked");
                Err(WorkerError::TaskJoinFailed(e.to_string()))
            }
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "transmission worker did not stop in time");
                Err(WorkerError::Timeout { timeout })
            }
        }
    }

    /// Whether the drain task is alive
    pub fn is_running(&self) -> bool {
        self.task_handle.is_some()
    }

    async fn process_loop(
        pipeline: Arc<TransmissionPipeline>,
        config: TransmissionWorkerConfig,
        cancel: CancellationToken,
    ) {
        let mut last_cleanup: Option<Instant> = None;
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("transmission worker cancelled");
                    break;
                }
                () = Self::tick(&pipeline, &config, &mut last_cleanup) => {}
            }

            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("transmission worker cancelled");
                    break;
                }
                () = tokio::time::sleep(config.poll_interval) => {}
            }
        }
    }

    async fn tick(
        pipeline: &TransmissionPipeline,
        config: &TransmissionWorkerConfig,
        last_cleanup: &mut Option<Instant>,
    ) {
        if let Err(e) = pipeline.recover_stale(config.stale_after).await {
            error!(error = %e, "stale record recovery failed");
        }

        match tokio::time::timeout(config.processing_timeout, pipeline.drain(config.batch_size)).await {
            Ok(Ok(report)) => {
                debug!(attempted = report.attempted, succeeded = report.succeeded, "drain tick");
            }
            Ok(Err(e)) => error!(error = %e, "drain pass failed"),
            Err(_) => warn!(
                timeout_secs = config.processing_timeout.as_secs(),
                "drain pass timed out"
            ),
        }

        let Some(retention) = config.retention else {
            return;
        };
        let due = last_cleanup.map_or(true, |at| at.elapsed() >= config.cleanup_interval);
        if due {
            *last_cleanup = Some(Instant::now());
            if let Err(e) = pipeline.cleanup(retention).await {
                error!(error = %e, "transmission cleanup failed");
            }
        }
    }
}

impl Drop for TransmissionWorker {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("transmission worker dropped while running; cancelling");
            self.cancellation.cancel();
        }
    }
}
