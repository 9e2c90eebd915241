use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use chrono::Datelike;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::clock::Clock;
use super::history::RunStatus;
use super::state::ProcessState;
use crate::error::RunnerError;
use crate::ingest::{Ingestor, RunConfig};
use crate::report::ErrorReporter;
use crate::storage::{RunLogStore, Store};

/// Pause between the end of one run and the start of the next.
pub const RUN_DELAY: Duration = Duration::from_secs(60);

/// Archive pages for the previous month keep trickling in during the first
/// days of a new month; until this day both months are fetched.
const CATCH_UP_UNTIL_DAY: u32 = 5;

/// Months to fetch when no override is configured.
pub fn months_to_fetch(override_months: Option<NonZeroU32>, day_of_month: u32) -> NonZeroU32 {
    override_months.unwrap_or(if day_of_month < CATCH_UP_UNTIL_DAY {
        NonZeroU32::MIN.saturating_add(1)
    } else {
        NonZeroU32::MIN
    })
}

/// Static inputs of every run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub source: String,
    pub sink: Store,
    pub months: Option<NonZeroU32>,
    pub parallel: Option<NonZeroU32>,
    pub delay: Duration,
}

/// Drives ingestion runs strictly one after another.
#[derive(Clone)]
pub struct Scheduler {
    settings: Arc<RunSettings>,
    ingestor: Arc<dyn Ingestor>,
    run_log: Arc<dyn RunLogStore>,
    reporter: ErrorReporter,
    state: ProcessState,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn new(
        settings: RunSettings,
        ingestor: Arc<dyn Ingestor>,
        run_log: Arc<dyn RunLogStore>,
        reporter: ErrorReporter,
        state: ProcessState,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            ingestor,
            run_log,
            reporter,
            state,
            clock,
        }
    }

    pub fn state(&self) -> &ProcessState {
        &self.state
    }

    /// Configuration for a run starting now.
    pub fn run_config(&self) -> RunConfig {
        let today = self.clock.now().day();
        RunConfig {
            source: self.settings.source.clone(),
            sink: self.settings.sink.clone(),
            months_to_fetch: months_to_fetch(self.settings.months, today),
            parallelism: self.settings.parallel.unwrap_or(NonZeroU32::MIN),
            on_error: self.reporter.on_error(),
        }
    }

    /// Perform one ingestion run and record its outcome.
    pub async fn trigger(&self) -> RunStatus {
        let config = self.run_config();
        let months = config.months_to_fetch;
        let parallel = config.parallelism;

        self.state.begin_run(self.clock.now());
        info!(%months, %parallel, "Ingestion run started");

        match self.ingestor.run(config).await {
            Ok(()) => {
                let record = self.state.finish_success(self.clock.now());
                info!(
                    run_id = %record.run_id,
                    duration = %crate::humanize::delta(record.duration()),
                    "Ingestion run finished"
                );
                if let Err(e) = self.run_log.insert(&record).await {
                    self.reporter
                        .recoverable(RunnerError::Persistence(e))
                        .await;
                }
                RunStatus::Succeeded
            }
            Err(e) => {
                self.state.finish_failure();
                warn!("Ingestion run failed, retrying in {:?}", self.settings.delay);
                self.reporter.recoverable(RunnerError::IngestionRun(e)).await;
                RunStatus::Failed
            }
        }
    }

    /// Run forever: trigger, wait the fixed delay, trigger again.
    ///
    /// Cancellation is only observed between runs.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(delay = ?self.settings.delay, "Scheduler loop started");

        while !shutdown.is_cancelled() {
            self.trigger().await;
            self.state.mark_idle();

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.settings.delay) => {}
            }
        }

        info!("Scheduler loop stopped");
    }

    /// Start the loop as a background task.
    pub fn spawn(self) -> SchedulerHandle {
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(self.run(shutdown.clone()));
        SchedulerHandle { shutdown, task }
    }
}

/// Owner of the running scheduler loop.
pub struct SchedulerHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    /// Resolves when the loop task ends, which only happens after
    /// [`SchedulerHandle::cancel`] or a panic.
    pub async fn finished(&mut self) -> Result<(), JoinError> {
        (&mut self.task).await
    }

    /// Cancel and wait for the in-flight run (if any) to complete.
    pub async fn stop(mut self) -> Result<(), JoinError> {
        self.cancel();
        self.finished().await
    }
}
