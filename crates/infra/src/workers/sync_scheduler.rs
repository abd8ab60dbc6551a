//! Daemon-mode sync loop
//!
//! Runs [`PeriodicSync`] on a spawned task until its time budget is spent or
//! the scheduler is stopped.

use std::sync::Arc;
use std::time::Duration;

use mailsync_core::{PeriodicSchedule, PeriodicSync};
use mailsync_domain::{AccountSelector, PeriodicReport, SyncConfig, SyncRequest};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::error::{WorkerError, WorkerResult};

/// Settings for the periodic sync worker
#[derive(Debug, Clone)]
pub struct SyncSchedulerConfig {
    /// Request repeated every cycle
    pub request: SyncRequest,
    pub schedule: PeriodicSchedule,
    /// Join timeout when stopping; covers a cycle still in flight
    pub join_timeout: Duration,
}

impl From<&SyncConfig> for SyncSchedulerConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            request: SyncRequest {
                selector: AccountSelector::AllActive,
                max_concurrent: config.max_concurrent,
                use_delta: config.use_delta,
                transmit: config.transmit_after_detect,
            },
            schedule: PeriodicSchedule {
                interval: config.interval(),
                max_duration: config.max_duration(),
                error_backoff: config.error_backoff(),
            },
            join_timeout: Duration::from_secs(60),
        }
    }
}

/// Runs [`PeriodicSync`] on a background task
pub struct SyncScheduler {
    periodic: Arc<PeriodicSync>,
    config: SyncSchedulerConfig,
    cancellation: CancellationToken,
    finished: CancellationToken,
    task_handle: Option<JoinHandle<PeriodicReport>>,
}

impl SyncScheduler {
    /// Scheduler that has not started yet
    pub fn new(periodic: Arc<PeriodicSync>, config: SyncSchedulerConfig) -> Self {
        Self {
            periodic,
            config,
            cancellation: CancellationToken::new(),
            finished: CancellationToken::new(),
            task_handle: None,
        }
    }

    /// Spawn the periodic loop.
    ///
    /// # Errors
    /// [`WorkerError::AlreadyRunning`] if a loop was started and not yet
    /// stopped.
    #[instrument(skip(self))]
    pub fn start(&mut self) -> WorkerResult<()> {
        if self.is_running() {
            return Err(WorkerError::AlreadyRunning);
        }

        self.cancellation = CancellationToken::new();
        self.finished = CancellationToken::new();

        let periodic = Arc::clone(&self.periodic);
        let request = self.config.request.clone();
        let schedule = self.config.schedule;
        let cancel = self.cancellation.clone();
        let finished = self.finished.clone();

        self.task_handle = Some(tokio::spawn(async move {
            let report = periodic.run(request, schedule, cancel).await;
            finished.cancel();
            report
        }));

        info!(
            interval_secs = self.config.schedule.interval.as_secs(),
            max_duration_secs = self.config.schedule.max_duration.as_secs(),
            "sync scheduler started"
        );
        Ok(())
    }

    /// Token that fires once the loop ends on its own (time budget spent)
    pub fn finished(&self) -> CancellationToken {
        self.finished.clone()
    }

    /// Stop the loop and return its report.
    ///
    /// Also collects the report of a loop that already finished.
    ///
    /// # Errors
    /// [`WorkerError::NotRunning`], [`WorkerError::Timeout`] or
    /// [`WorkerError::TaskJoinFailed`].
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> WorkerResult<PeriodicReport> {
        let handle = self.task_handle.take().ok_or(WorkerError::NotRunning)?;
        self.cancellation.cancel();

        let timeout = self.config.join_timeout;
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(report)) => {
                info!(cycles = report.cycles, failed_cycles = report.failed_cycles, "sync scheduler stopped");
                Ok(report)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "sync scheduler task panicked");
                Err(WorkerError::TaskJoinFailed(e.to_string()))
            }
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "sync scheduler did not stop in time");
                Err(WorkerError::Timeout { timeout })
            }
        }
    }

    /// True between `start` and `stop`, even if the loop already ended
    pub fn is_running(&self) -> bool {
        self.task_handle.is_some()
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("sync scheduler dropped while running; cancelling");
            self.cancellation.cancel();
        }
    }
}
