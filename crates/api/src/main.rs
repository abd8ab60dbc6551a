//! Mailsync daemon
//!
//! Loads configuration, installs tracing, then runs the periodic sync and the
//! transmission worker until Ctrl-C or until the sync window ends.

use anyhow::Context;
use mailsync_app::AppContext;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional; real environment variables win.
    let dotenv = dotenvy::dotenv().ok();

    let config = mailsync_infra::config::load().context("failed to load configuration")?;
    mailsync_infra::init_tracing(&config.logging).context("failed to initialise tracing")?;
    if let Some(path) = dotenv {
        info!(path = %path.display(), "loaded .env");
    }

    let ctx = AppContext::new(config).context("failed to build application context")?;
    let health = ctx.health().await;
    if !health.is_healthy {
        warn!(message = ?health.message, "starting with unhealthy components");
    }

    ctx.start().await.context("failed to start background workers")?;
    let finished = ctx.sync_finished().await;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            info!("shutdown requested");
        }
        () = finished.cancelled() => {
            info!("sync window elapsed");
        }
    }

    let report = ctx.shutdown().await.context("failed to stop background workers")?;
    if let Some(report) = report {
        info!(
            cycles = report.cycles,
            failed_cycles = report.failed_cycles,
            duration_ms = report.duration_ms,
            "periodic sync finished"
        );
    }

    let summary = ctx.pipeline.summary().await.context("failed to read transmission summary")?;
    info!(total = summary.total, success_rate = summary.success_rate, "mailsync stopped");
    Ok(())
}
