//! Status page and probe endpoint.

use std::fmt::Write as _;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::{routing::get, Router};
use chrono::{DateTime, SecondsFormat, Utc};

use super::state::{AppState, StatusSettings};
use super::watchdog::Verdict;
use crate::error::RunnerError;
use crate::lifecycle::ExitReason;
use crate::report::Severity;
use crate::scheduler::StateSnapshot;

pub fn status_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(status_page))
        .route("/healthz", get(healthz))
}

async fn status_page(State(state): State<AppState>) -> impl IntoResponse {
    let (verdict, snapshot, now) = inspect(&state);
    let body = render(
        verdict,
        &state.settings,
        &snapshot,
        &state.ingestor.status(),
        now,
    );
    (
        verdict.status_code(),
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
}

async fn healthz(State(state): State<AppState>) -> StatusCode {
    let (verdict, _, _) = inspect(&state);
    verdict.status_code()
}

/// Take a snapshot, run the watchdog, and act on a stale verdict.
///
/// The first stale observation asks the lifecycle controller to terminate and
/// reports the staleness in the background; later requests only answer 503.
fn inspect(state: &AppState) -> (Verdict, StateSnapshot, DateTime<Utc>) {
    let now = state.clock.now();
    let verdict = state.watchdog.evaluate(&state.process.snapshot(), now);

    if let Verdict::Stale { elapsed } = verdict {
        if state.terminator.request(ExitReason::Stale) {
            state.process.mark_self_terminating();
            // The 503 goes out now; the lifecycle waits for delivery.
            let report = state.reporter.spawn_report(
                RunnerError::Staleness {
                    elapsed,
                    threshold: state.watchdog.threshold(),
                }
                .into(),
                Severity::Fatal,
            );
            state.terminator.hold_until(report);
        }
    }

    (verdict, state.process.snapshot(), now)
}

fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Plain-text status page.
pub fn render(
    verdict: Verdict,
    settings: &StatusSettings,
    snapshot: &StateSnapshot,
    ingest_status: &str,
    now: DateTime<Utc>,
) -> String {
    let mut body = String::new();
    if verdict.status_code() == StatusCode::SERVICE_UNAVAILABLE {
        body.push_str("WARNING: server behind on processing\n\n");
    }

    let last_start = snapshot
        .last_run_start
        .map(timestamp)
        .unwrap_or_else(|| "never started".to_string());
    let last_end = snapshot
        .last_run_end
        .map(timestamp)
        .unwrap_or_else(|| "never finished".to_string());
    let previous_run = snapshot
        .last_run_duration
        .map(crate::humanize::delta)
        .unwrap_or_else(|| "no old runs to display".to_string());
    let current_run = snapshot
        .current_run(now)
        .map(crate::humanize::delta)
        .unwrap_or_else(|| "-".to_string());

    // Writing into a String cannot fail.
    let _ = write!(
        body,
        "last-reboot:  {}\n\
         source:       {}\n\
         database:     {}\n\
         \n\
         last-start:   {}\n\
         last-end:     {}\n\
         previous-run: {}\n\
         current-run:  {}\n\
         phase:        {}\n\
         status:       {}\n\
         \n\
         current-time: {}",
        timestamp(snapshot.booted_at),
        settings.source,
        settings.database,
        last_start,
        last_end,
        previous_run,
        current_run,
        snapshot.phase,
        ingest_status,
        timestamp(now),
    );
    body
}
