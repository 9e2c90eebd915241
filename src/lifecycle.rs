//! Process lifecycle controller.
//!
//! Apart from the panic hook, nothing in the crate exits the process.
//! Components ask for termination through a [`Terminator`]; [`Lifecycle::wait`]
//! resolves once a request arrived (plus the grace period where one applies and
//! any held reports) and `main` turns the [`ExitReason`] into an exit code.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Time given to in-flight error reports before a self-termination.
pub const TERMINATION_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The watchdog saw no completed run within the staleness threshold.
    Stale,
    /// A task ended in a way it never should.
    Uncaught,
    /// Operator asked for shutdown (Ctrl-C).
    Shutdown,
}

impl ExitReason {
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitReason::Shutdown => 0,
            ExitReason::Stale | ExitReason::Uncaught => 1,
        }
    }

    fn grace(&self, grace: Duration) -> Duration {
        match self {
            ExitReason::Stale => grace,
            ExitReason::Uncaught | ExitReason::Shutdown => Duration::ZERO,
        }
    }
}

type Pending = Arc<Mutex<Vec<JoinHandle<()>>>>;

/// Cloneable handle for requesting termination.
#[derive(Debug, Clone)]
pub struct Terminator {
    tx: Arc<watch::Sender<Option<ExitReason>>>,
    pending: Pending,
}

impl Terminator {
    /// Ask for the process to end. Only the first request counts; returns
    /// whether this call was it.
    pub fn request(&self, reason: ExitReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        })
    }

    pub fn requested(&self) -> Option<ExitReason> {
        *self.tx.borrow()
    }

    /// Keep the process alive until `task` finishes, even once termination
    /// has been requested.
    pub fn hold_until(&self, task: JoinHandle<()>) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }
}

#[derive(Debug)]
pub struct Lifecycle {
    rx: watch::Receiver<Option<ExitReason>>,
    grace: Duration,
    pending: Pending,
}

impl Lifecycle {
    pub fn new(grace: Duration) -> (Self, Terminator) {
        let (tx, rx) = watch::channel(None);
        let pending = Pending::default();
        (
            Self {
                rx,
                grace,
                pending: pending.clone(),
            },
            Terminator {
                tx: Arc::new(tx),
                pending,
            },
        )
    }

    /// Wait for the first termination request, its grace period, then every
    /// held task.
    pub async fn wait(mut self) -> ExitReason {
        let reason = loop {
            let current = *self.rx.borrow_and_update();
            if let Some(reason) = current {
                break reason;
            }
            if self.rx.changed().await.is_err() {
                // Every terminator is gone; nobody can ask any more.
                std::future::pending::<()>().await;
            }
        };

        let grace = reason.grace(self.grace);
        if grace.is_zero() {
            info!(?reason, "terminating");
        } else {
            warn!(?reason, ?grace, "terminating after grace period");
            tokio::time::sleep(grace).await;
        }

        let held = std::mem::take(
            &mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner),
        );
        if !held.is_empty() {
            info!(tasks = held.len(), "waiting for pending reports");
        }
        for task in held {
            let _ = task.await;
        }
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitReason::Stale.exit_code(), 1);
        assert_eq!(ExitReason::Uncaught.exit_code(), 1);
        assert_eq!(ExitReason::Shutdown.exit_code(), 0);
    }

    #[test]
    fn test_first_request_wins() {
        let (_lifecycle, terminator) = Lifecycle::new(TERMINATION_GRACE);
        assert!(terminator.requested().is_none());
        assert!(terminator.request(ExitReason::Stale));
        assert!(!terminator.clone().request(ExitReason::Uncaught));
        assert_eq!(terminator.requested(), Some(ExitReason::Stale));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_waits_for_grace() {
        let (lifecycle, terminator) = Lifecycle::new(TERMINATION_GRACE);
        let started = Instant::now();
        let waiter = tokio::spawn(lifecycle.wait());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!waiter.is_finished());

        let requested_at = Instant::now();
        terminator.request(ExitReason::Stale);
        let reason = waiter.await.unwrap();

        assert_eq!(reason, ExitReason::Stale);
        let took = requested_at.elapsed();
        assert!(took >= TERMINATION_GRACE);
        assert!(took < TERMINATION_GRACE + Duration::from_millis(50));
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_held_task_outlives_grace() {
        let (lifecycle, terminator) = Lifecycle::new(TERMINATION_GRACE);
        let requested_at = Instant::now();
        terminator.request(ExitReason::Stale);
        terminator.hold_until(tokio::spawn(tokio::time::sleep(Duration::from_secs(3))));

        assert_eq!(lifecycle.wait().await, ExitReason::Stale);
        assert!(requested_at.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_uncaught_is_immediate() {
        let (lifecycle, terminator) = Lifecycle::new(TERMINATION_GRACE);
        terminator.request(ExitReason::Uncaught);
        let requested_at = Instant::now();
        assert_eq!(lifecycle.wait().await, ExitReason::Uncaught);
        assert!(requested_at.elapsed() < Duration::from_millis(1));
    }
}
