//! Process state shared between the scheduler loop and the status server.
//!
//! The scheduler is the only writer. Readers take a [`StateSnapshot`], a plain
//! copy made under a short read lock, so every status response reports one
//! consistent view.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use super::history::RunRecord;

/// Where the runner is in its lifecycle.
///
/// `NeverRun -> Running -> {Succeeded, Failed} -> Idle -> Running -> ...`,
/// plus `Idle -> SelfTerminating` when the watchdog fires. `SelfTerminating`
/// is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    NeverRun,
    Running,
    Succeeded,
    Failed,
    Idle,
    SelfTerminating,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::NeverRun => write!(f, "never-run"),
            Phase::Running => write!(f, "running"),
            Phase::Succeeded => write!(f, "succeeded"),
            Phase::Failed => write!(f, "failed"),
            Phase::Idle => write!(f, "idle"),
            Phase::SelfTerminating => write!(f, "self-terminating"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    /// When this process came up.
    pub booted_at: DateTime<Utc>,
    pub last_run_start: Option<DateTime<Utc>>,
    /// Absent until a run completes successfully.
    pub last_run_end: Option<DateTime<Utc>>,
    /// Duration of the last successful run.
    pub last_run_duration: Option<TimeDelta>,
    /// Set while a run is in flight.
    pub current_run_start: Option<DateTime<Utc>>,
    pub phase: Phase,
    pub runs_succeeded: u64,
    pub runs_failed: u64,
}

impl StateSnapshot {
    /// Elapsed time of the in-flight run, if any.
    pub fn current_run(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        self.current_run_start.map(|start| now - start)
    }
}

#[derive(Debug, Clone)]
pub struct ProcessState {
    inner: Arc<RwLock<StateSnapshot>>,
}

impl ProcessState {
    pub fn new(booted_at: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StateSnapshot {
                booted_at,
                last_run_start: None,
                last_run_end: None,
                last_run_duration: None,
                current_run_start: None,
                phase: Phase::NeverRun,
                runs_succeeded: 0,
                runs_failed: 0,
            })),
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update<R>(&self, f: impl FnOnce(&mut StateSnapshot) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Mark a run as started at `now`.
    pub fn begin_run(&self, now: DateTime<Utc>) {
        self.update(|s| {
            s.last_run_start = Some(now);
            s.current_run_start = Some(now);
            if s.phase != Phase::SelfTerminating {
                s.phase = Phase::Running;
            }
        })
    }

    /// Close the in-flight run as successful and build its record.
    ///
    /// The end is clamped to the start so a clock step backwards can never
    /// produce `start > end`.
    pub fn finish_success(&self, now: DateTime<Utc>) -> RunRecord {
        self.update(|s| {
            let start = s.current_run_start.take().unwrap_or(now);
            let end = now.max(start);
            s.last_run_start = Some(start);
            s.last_run_end = Some(end);
            s.last_run_duration = Some(end - start);
            s.runs_succeeded += 1;
            if s.phase != Phase::SelfTerminating {
                s.phase = Phase::Succeeded;
            }
            RunRecord::new(start, end)
        })
    }

    /// Close the in-flight run as failed. `last_run_end` stays untouched.
    pub fn finish_failure(&self) {
        self.update(|s| {
            s.current_run_start = None;
            s.runs_failed += 1;
            if s.phase != Phase::SelfTerminating {
                s.phase = Phase::Failed;
            }
        })
    }

    pub fn mark_idle(&self) {
        self.update(|s| {
            if s.phase != Phase::SelfTerminating {
                s.phase = Phase::Idle;
            }
        })
    }

    pub fn mark_self_terminating(&self) {
        self.update(|s| s.phase = Phase::SelfTerminating)
    }
}
