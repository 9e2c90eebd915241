//! Liveness watchdog.
//!
//! Pure staleness check over a [`StateSnapshot`]. It is evaluated lazily,
//! once per status request: while no probe arrives, a stalled scheduler is
//! never detected.

use std::time::Duration;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};

use crate::scheduler::StateSnapshot;

/// Longest acceptable gap since the last successful run.
pub const STALENESS_THRESHOLD: Duration = Duration::from_secs(20 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// No run has completed since the process started.
    NeverFinished,
    /// The last completion is older than the threshold.
    Stale { elapsed: Duration },
    Healthy,
}

impl Verdict {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Verdict::Healthy => StatusCode::OK,
            Verdict::NeverFinished | Verdict::Stale { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Watchdog {
    threshold: Duration,
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new(STALENESS_THRESHOLD)
    }
}

impl Watchdog {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn evaluate(&self, snapshot: &StateSnapshot, now: DateTime<Utc>) -> Verdict {
        let Some(end) = snapshot.last_run_end else {
            return Verdict::NeverFinished;
        };
        let elapsed = (now - end).to_std().unwrap_or_default();
        if elapsed > self.threshold {
            Verdict::Stale { elapsed }
        } else {
            Verdict::Healthy
        }
    }
}
