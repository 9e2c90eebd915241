//! Ingestion collaborator -- the archive fetcher the scheduler drives.

pub mod command;

use std::num::NonZeroU32;

use anyhow::Result;

use crate::report::OnError;
use crate::storage::Store;

pub use self::command::CommandIngestor;

/// Everything one ingestion run needs. Built fresh for every cycle.
#[derive(Clone)]
pub struct RunConfig {
    /// Archive root to read from.
    pub source: String,
    /// Where ingested content goes.
    pub sink: Store,
    pub months_to_fetch: NonZeroU32,
    pub parallelism: NonZeroU32,
    /// Non-fatal failures observed during the run.
    pub on_error: OnError,
}

impl std::fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunConfig")
            .field("source", &self.source)
            .field("sink", &self.sink)
            .field("months_to_fetch", &self.months_to_fetch)
            .field("parallelism", &self.parallelism)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
pub trait Ingestor: Send + Sync {
    /// Run one ingestion pass to completion.
    async fn run(&self, config: RunConfig) -> Result<()>;

    /// Self-reported progress, shown on the status page.
    fn status(&self) -> String;
}
