//! Records of completed ingestion runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind tag stored with every run record.
pub const BOT_RUN: &str = "bot-run";

/// A completed ingestion run, as appended to the run log.
///
/// Only successful runs produce a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: uuid::Uuid,
    pub kind: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl RunRecord {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4(),
            kind: BOT_RUN.to_string(),
            start,
            end,
        }
    }

    pub fn duration(&self) -> chrono::TimeDelta {
        self.end - self.start
    }
}

/// How a single `trigger()` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Succeeded,
    Failed,
}
