//! Scheduler loop -- one ingestion run at a time, forever.

pub mod clock;
pub mod engine;
pub mod history;
pub mod state;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::engine::{months_to_fetch, RunSettings, Scheduler, SchedulerHandle, RUN_DELAY};
pub use self::history::{RunRecord, RunStatus};
pub use self::state::{Phase, ProcessState, StateSnapshot};
