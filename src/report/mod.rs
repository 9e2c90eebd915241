//! Error reporting -- the single funnel every failure goes through.
//!
//! Incidents are always logged locally with `tracing`. When a remote tracker
//! is configured the incident is forwarded to it as well.

pub mod tracker;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::error::RunnerError;

pub use self::tracker::{HttpTracker, RemoteTracker, TrackerEvent};

/// What the caller intends to happen after the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The loop carries on; the next cycle retries.
    Recoverable,
    /// The caller terminates the process once the report returns.
    Fatal,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Recoverable => "error",
            Severity::Fatal => "fatal",
        }
    }
}

/// A reportable failure: a free-form message or a classified error.
#[derive(Debug)]
pub enum Incident {
    Message(String),
    Error(RunnerError),
}

impl Incident {
    pub fn kind(&self) -> &'static str {
        match self {
            Incident::Message(_) => "message",
            Incident::Error(err) => err.kind(),
        }
    }
}

impl std::fmt::Display for Incident {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Incident::Message(msg) => f.write_str(msg),
            Incident::Error(err) => write!(f, "{err}"),
        }
    }
}

impl From<RunnerError> for Incident {
    fn from(err: RunnerError) -> Self {
        Incident::Error(err)
    }
}

impl From<String> for Incident {
    fn from(msg: String) -> Self {
        Incident::Message(msg)
    }
}

impl From<&str> for Incident {
    fn from(msg: &str) -> Self {
        Incident::Message(msg.to_string())
    }
}

/// Callback handed to the ingestor for failures it wants surfaced without
/// failing the whole run.
pub type OnError = Arc<dyn Fn(Incident) + Send + Sync>;

#[derive(Clone, Default)]
pub struct ErrorReporter {
    tracker: Option<Arc<dyn RemoteTracker>>,
    reported: Arc<AtomicU64>,
}

impl std::fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorReporter")
            .field("remote", &self.tracker.is_some())
            .field("reported", &self.reported_count())
            .finish()
    }
}

impl ErrorReporter {
    /// Reporter that only logs locally.
    pub fn local() -> Self {
        Self::default()
    }

    pub fn with_tracker(tracker: Arc<dyn RemoteTracker>) -> Self {
        Self {
            tracker: Some(tracker),
            reported: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Build from an optional tracker URL.
    pub fn from_url(url: Option<&str>) -> anyhow::Result<Self> {
        match url {
            Some(url) => Ok(Self::with_tracker(Arc::new(HttpTracker::new(url)?))),
            None => Ok(Self::local()),
        }
    }

    /// Log the incident and, when configured, deliver it to the tracker.
    /// Returns once delivery finished so fatal callers can exit right after.
    pub async fn report(&self, incident: impl Into<Incident>, severity: Severity) {
        let incident = incident.into();
        self.reported.fetch_add(1, Ordering::Relaxed);

        let fatal = severity == Severity::Fatal;
        error!(kind = incident.kind(), fatal, "{incident}");

        if let Some(tracker) = &self.tracker {
            let event = TrackerEvent::new(&incident, severity);
            if let Err(e) = tracker.capture(&event).await {
                warn!(event_id = %event.event_id, error = %e, "failed to deliver incident to error tracker");
            }
        }
    }

    pub async fn recoverable(&self, incident: impl Into<Incident>) {
        self.report(incident, Severity::Recoverable).await
    }

    pub async fn fatal(&self, incident: impl Into<Incident>) {
        self.report(incident, Severity::Fatal).await
    }

    /// Fire-and-forget variant for synchronous call sites.
    pub fn spawn_report(&self, incident: Incident, severity: Severity) -> JoinHandle<()> {
        let reporter = self.clone();
        tokio::spawn(async move { reporter.report(incident, severity).await })
    }

    /// Non-fatal callback for the ingestion run configuration.
    pub fn on_error(&self) -> OnError {
        let reporter = self.clone();
        Arc::new(move |incident| {
            reporter.spawn_report(incident, Severity::Recoverable);
        })
    }

    /// Number of incidents reported so far.
    pub fn reported_count(&self) -> u64 {
        self.reported.load(Ordering::Relaxed)
    }

    /// Report a fatal incident from synchronous code and wait for delivery.
    ///
    /// Delivery runs on a dedicated thread with its own runtime, so this may
    /// be called from inside a runtime worker.
    pub fn fatal_blocking(&self, incident: Incident) {
        let reporter = self.clone();
        let spawned = std::thread::Builder::new()
            .name("fatal-report".to_string())
            .spawn(move || {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime.block_on(reporter.fatal(incident)),
                    Err(e) => {
                        error!(kind = incident.kind(), fatal = true, "{incident}");
                        warn!(error = %e, "no runtime to deliver incident to error tracker");
                    }
                }
            });
        match spawned {
            Ok(delivery) => {
                let _ = delivery.join();
            }
            Err(e) => error!(error = %e, "failed to start fatal report thread"),
        }
    }

    /// Send every panic through the reporter as an uncaught error, then exit
    /// with status 1.
    pub fn install_panic_hook(&self) {
        let reporter = self.clone();
        let reporting = AtomicBool::new(false);
        std::panic::set_hook(Box::new(move |info| {
            // A panic while reporting a panic just exits.
            if !reporting.swap(true, Ordering::SeqCst) {
                let cause = anyhow::anyhow!("{info}");
                reporter.fatal_blocking(RunnerError::Uncaught(cause).into());
            }
            std::process::exit(1);
        }));
    }
}
