use std::sync::Arc;

use crate::api::watchdog::Watchdog;
use crate::ingest::Ingestor;
use crate::lifecycle::Terminator;
use crate::report::ErrorReporter;
use crate::scheduler::{Clock, ProcessState};

/// Static lines printed at the top of every status page.
#[derive(Debug, Clone)]
pub struct StatusSettings {
    pub source: String,
    /// Database location with credentials already stripped.
    pub database: String,
}

#[derive(Clone)]
pub struct AppState {
    pub process: ProcessState,
    pub ingestor: Arc<dyn Ingestor>,
    pub reporter: ErrorReporter,
    pub terminator: Terminator,
    pub clock: Arc<dyn Clock>,
    pub watchdog: Watchdog,
    pub settings: Arc<StatusSettings>,
}
