//! Scheduler, run log and status server wired together the way `serve` does,
//! with a manual clock in place of the system clock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{TimeDelta, TimeZone, Utc};
use pipermail_runner::api::state::{AppState, StatusSettings};
use pipermail_runner::api::watchdog::Watchdog;
use pipermail_runner::ingest::{Ingestor, RunConfig};
use pipermail_runner::lifecycle::{ExitReason, Lifecycle, TERMINATION_GRACE};
use pipermail_runner::report::ErrorReporter;
use pipermail_runner::scheduler::{
    Clock, ManualClock, ProcessState, RunSettings, RunStatus, Scheduler, RUN_DELAY,
};
use pipermail_runner::storage::{RunLogStore, SqliteRunLog, Store};
use tower::ServiceExt;

struct FlakyFetcher {
    clock: Arc<ManualClock>,
    fail_next: AtomicBool,
}

#[async_trait::async_trait]
impl Ingestor for FlakyFetcher {
    async fn run(&self, config: RunConfig) -> Result<()> {
        self.clock.advance(TimeDelta::seconds(75));
        if self.fail_next.swap(false, Ordering::SeqCst) {
            (config.on_error)("mailing list index timed out".into());
            anyhow::bail!("gave up after 3 retries");
        }
        Ok(())
    }

    fn status(&self) -> String {
        "2 months queued".to_string()
    }
}

async fn get_status(app: &axum::Router) -> (StatusCode, String) {
    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn test_run_then_stall_then_self_terminate() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("runner.db").to_str().unwrap()).unwrap();
    let run_log = Arc::new(SqliteRunLog::new(store.pool().clone()));

    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 7, 2, 6, 0, 0).unwrap(),
    ));
    let fetcher = Arc::new(FlakyFetcher {
        clock: clock.clone(),
        fail_next: AtomicBool::new(true),
    });
    let reporter = ErrorReporter::local();
    let process = ProcessState::new(clock.now());
    let scheduler = Scheduler::new(
        RunSettings {
            source: "https://lists.example.org/pipermail/dev/".to_string(),
            sink: store,
            months: None,
            parallel: None,
            delay: RUN_DELAY,
        },
        fetcher.clone(),
        run_log.clone(),
        reporter.clone(),
        process.clone(),
        clock.clone(),
    );
    let (lifecycle, terminator) = Lifecycle::new(TERMINATION_GRACE);
    let app = pipermail_runner::api::router(AppState {
        process: process.clone(),
        ingestor: fetcher.clone(),
        reporter: reporter.clone(),
        terminator: terminator.clone(),
        clock: clock.clone(),
        watchdog: Watchdog::default(),
        settings: Arc::new(StatusSettings {
            source: "https://lists.example.org/pipermail/dev/".to_string(),
            database: "runner.db".to_string(),
        }),
    });

    // Day 2 of the month: both months are fetched.
    assert_eq!(scheduler.run_config().months_to_fetch.get(), 2);

    // A failed first run leaves the runner unhealthy and logs nothing.
    assert_eq!(scheduler.trigger().await, RunStatus::Failed);
    assert!(run_log.recent(10).await.unwrap().is_empty());
    let (status, body) = get_status(&app).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body.contains("never finished"));
    assert!(body.contains("status:       2 months queued"));

    // The retry succeeds.
    clock.advance(TimeDelta::seconds(60));
    assert_eq!(scheduler.trigger().await, RunStatus::Succeeded);
    let records = run_log.recent(10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].start <= records[0].end);
    assert_eq!(records[0].duration(), TimeDelta::seconds(75));

    let (status, body) = get_status(&app).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("previous-run: 1m"));

    // No further completions for 25 minutes.
    clock.advance(TimeDelta::minutes(25));
    let (status, _) = get_status(&app).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(terminator.requested(), Some(ExitReason::Stale));
    assert_eq!(lifecycle.wait().await.exit_code(), 1);
}
