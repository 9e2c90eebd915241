//! Failure taxonomy shared by the scheduler, status server and lifecycle.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

/// Every failure the runner knows how to classify.
///
/// Only [`RunnerError::Configuration`], [`RunnerError::Staleness`] and
/// [`RunnerError::Uncaught`] end the process; the other kinds are absorbed and
/// retried on the next scheduled cycle.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigError),

    #[error("ingestion run failed: {0:#}")]
    IngestionRun(anyhow::Error),

    #[error("failed to persist run record: {0:#}")]
    Persistence(anyhow::Error),

    #[error("Timeout triggering restart: last run finished {} ago (threshold {})",
        crate::humanize::duration(.elapsed),
        crate::humanize::duration(.threshold))]
    Staleness { elapsed: Duration, threshold: Duration },

    #[error("uncaught error: {0:#}")]
    Uncaught(anyhow::Error),
}

impl RunnerError {
    /// Short machine-friendly tag used in logs and tracker events.
    pub fn kind(&self) -> &'static str {
        match self {
            RunnerError::Configuration(_) => "configuration",
            RunnerError::IngestionRun(_) => "ingestion_run",
            RunnerError::Persistence(_) => "persistence",
            RunnerError::Staleness { .. } => "staleness",
            RunnerError::Uncaught(_) => "uncaught",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RunnerError::Configuration(_) | RunnerError::Staleness { .. } | RunnerError::Uncaught(_)
        )
    }
}
