//! Repeated sync runs on a fixed interval

use std::time::Duration;

use mailsync_domain::{PeriodicReport, SyncRequest};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::orchestrator::SyncOrchestrator;

/// Timing for [`PeriodicSync::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodicSchedule {
    /// Pause between the end of one cycle and the start of the next
    pub interval: Duration,
    /// No new cycle starts once this much time has passed
    pub max_duration: Duration,
    /// Extra pause after a cycle that failed outright
    pub error_backoff: Duration,
}

/// Repeats [`SyncOrchestrator::sync_all`] until the time budget runs out or
/// the token is cancelled
pub struct PeriodicSync {
    orchestrator: SyncOrchestrator,
}

impl PeriodicSync {
    /// Periodic runner over `orchestrator`
    pub fn new(orchestrator: SyncOrchestrator) -> Self {
        Self { orchestrator }
    }

    /// Run cycles until `schedule.max_duration` is exceeded or `cancel`
    /// fires.
    ///
    /// A cycle in flight is allowed to finish. Cycle errors are logged and
    /// counted; they never end the loop.
    pub async fn run(
        &self,
        request: SyncRequest,
        schedule: PeriodicSchedule,
        cancel: CancellationToken,
    ) -> PeriodicReport {
        let started = Instant::now();
        let mut report = PeriodicReport {
            cycles: 0,
            failed_cycles: 0,
            cancelled: false,
            duration_ms: 0,
            last_report: None,
        };

        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            if started.elapsed() >= schedule.max_duration {
                break;
            }

            report.cycles += 1;
            let mut pause = schedule.interval;
            match self.orchestrator.sync_all(request.clone()).await {
                Ok(cycle) => {
                    if !cycle.is_success() {
                        warn!(cycle = report.cycles, failed = cycle.failed, "sync cycle had account failures");
                    }
                    report.last_report = Some(cycle);
                }
                Err(err) => {
                    report.failed_cycles += 1;
                    error!(cycle = report.cycles, error = %err, "sync cycle failed");
                    pause += schedule.error_backoff;
                }
            }

            let remaining = schedule.max_duration.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                break;
            }
            tokio::select! {
                () = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                () = tokio::time::sleep(pause.min(remaining)) => {}
            }
        }

        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            cycles = report.cycles,
            failed_cycles = report.failed_cycles,
            cancelled = report.cancelled,
            "periodic sync stopped"
        );
        report
    }
}
