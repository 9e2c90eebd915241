//! pipermail-runner -- perpetual archive ingestion runner.
//!
//! This crate drives an external mailing-list archive fetcher one run at a
//! time, records completed runs, and serves a plain-text status page whose
//! watchdog restarts the process (through its supervisor) when runs stall.

pub mod api;
pub mod config;
pub mod error;
pub mod humanize;
pub mod ingest;
pub mod lifecycle;
pub mod report;
pub mod scheduler;
pub mod storage;

use std::future::{Future, IntoFuture};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::state::{AppState, StatusSettings};
use crate::api::watchdog::Watchdog;
use crate::config::ValidConfig;
use crate::error::RunnerError;
use crate::ingest::CommandIngestor;
use crate::lifecycle::{ExitReason, Lifecycle, TERMINATION_GRACE};
use crate::report::ErrorReporter;
use crate::scheduler::{
    Clock, ProcessState, RunSettings, Scheduler, SchedulerHandle, SystemClock, RUN_DELAY,
};
use crate::storage::{SqliteRunLog, Store};

/// Start the runner: scheduler loop, status server, and lifecycle controller.
///
/// Returns why the process should end; the caller maps it to an exit code.
/// Startup failures after the reporter exists are reported as uncaught, and
/// from then on a panic anywhere is reported and exits with status 1.
pub async fn serve(config: ValidConfig) -> Result<ExitReason> {
    let reporter = ErrorReporter::from_url(config.error_tracker_url.as_deref())?;
    reporter.install_panic_hook();

    match run(config, reporter.clone()).await {
        Ok(reason) => Ok(reason),
        Err(e) => {
            reporter.fatal(RunnerError::Uncaught(e)).await;
            Ok(ExitReason::Uncaught)
        }
    }
}

async fn run(config: ValidConfig, reporter: ErrorReporter) -> Result<ExitReason> {
    // 1. Initialize Storage
    tracing::info!(database = %config.sanitized_database(), "Initializing database");
    let store = Store::open(&config.database)?;
    let run_log = Arc::new(SqliteRunLog::new(store.pool().clone()));

    // 2. Initialize Scheduler
    let ingestor = Arc::new(CommandIngestor::from_command_line(&config.ingest_command)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let process = ProcessState::new(clock.now());
    let scheduler = Scheduler::new(
        RunSettings {
            source: config.source.clone(),
            sink: store,
            months: config.months,
            parallel: config.parallel,
            delay: RUN_DELAY,
        },
        ingestor.clone(),
        run_log,
        reporter.clone(),
        process.clone(),
        clock.clone(),
    );

    // 3. Lifecycle controller + API state
    let (lifecycle, terminator) = Lifecycle::new(TERMINATION_GRACE);
    let app = api::router(AppState {
        process,
        ingestor,
        reporter: reporter.clone(),
        terminator,
        clock,
        watchdog: Watchdog::default(),
        settings: Arc::new(StatusSettings {
            source: config.source.clone(),
            database: config.sanitized_database().to_string(),
        }),
    });

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind status server on {addr}"))?;
    tracing::info!(%addr, source = %config.source, "pipermail-runner listening");

    // 4. Start Scheduler Engine (background task)
    let scheduler = scheduler.spawn();
    let server = axum::serve(listener, app).into_future();

    Ok(supervise(lifecycle, server, scheduler, tokio::signal::ctrl_c(), &reporter).await)
}

/// Race the lifecycle controller against the long-lived tasks.
///
/// The server and the scheduler loop never end on their own; when either does,
/// that is reported as uncaught. `shutdown` resolving stops the loop between
/// runs.
async fn supervise<S, D>(
    lifecycle: Lifecycle,
    server: S,
    mut scheduler: SchedulerHandle,
    shutdown: D,
    reporter: &ErrorReporter,
) -> ExitReason
where
    S: Future<Output = std::io::Result<()>>,
    D: Future,
{
    tokio::select! {
        reason = lifecycle.wait() => reason,
        result = server => {
            let cause = match result {
                Ok(()) => anyhow::anyhow!("status server stopped unexpectedly"),
                Err(e) => anyhow::Error::new(e).context("status server failed"),
            };
            reporter.fatal(RunnerError::Uncaught(cause)).await;
            ExitReason::Uncaught
        }
        result = scheduler.finished() => {
            let cause = match result {
                Ok(()) => anyhow::anyhow!("scheduler loop stopped unexpectedly"),
                Err(e) => anyhow::Error::new(e).context("scheduler loop crashed"),
            };
            reporter.fatal(RunnerError::Uncaught(cause)).await;
            ExitReason::Uncaught
        }
        _ = shutdown => {
            tracing::info!("Shutdown requested");
            scheduler.cancel();
            ExitReason::Shutdown
        }
    }
}
