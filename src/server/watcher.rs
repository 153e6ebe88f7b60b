//! Readiness watcher
//!
//! Polls the readiness gate after the server starts. If the application does
//! not enable the gate before the deadline, the failure is escalated (by
//! default the process aborts): serving an un-gated instance is worse than
//! crashing.
//!
//! ```text
//! Polling ──enabled──────────▶ Satisfied
//!    │ ──stop / not serving──▶ Stopped
//!    └ ──deadline passed─────▶ Escalated
//! ```

use crate::server::escalation::{Escalation, FatalError};
use crate::server::health::ReadinessGate;
use crate::server::stop::{stop_channel, StopHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Upper bound on the poll interval, keeps tick arithmetic in range
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// How the watcher task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The gate was enabled before the deadline
    Satisfied,
    /// Stopped explicitly, or the listener stopped serving
    Stopped,
    /// The deadline passed and the failure was escalated
    Escalated,
}

/// Timing for a watcher run
#[derive(Debug, Clone, Copy)]
pub struct WatchSettings {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

/// Handle to a running watcher task
pub struct ReadinessWatcher {
    stop: StopHandle,
    task: JoinHandle<WatchOutcome>,
}

impl ReadinessWatcher {
    /// Start watching `gate`
    ///
    /// The deadline is computed from the moment of the call; a timeout too large
    /// to represent as an instant means there is no deadline. `is_serving` is
    /// checked on every tick; once it returns false the watcher exits quietly.
    pub fn spawn<F>(
        gate: ReadinessGate,
        is_serving: F,
        settings: WatchSettings,
        escalation: Arc<dyn Escalation>,
    ) -> Self
    where
        F: Fn() -> bool + Send + 'static,
    {
        let (stop, signal) = stop_channel();
        let deadline = Instant::now().checked_add(settings.timeout);
        if deadline.is_none() {
            warn!(timeout = ?settings.timeout, "Readiness timeout out of range, watching without a deadline");
        }
        let poll_interval = settings
            .poll_interval
            .clamp(Duration::from_millis(1), MAX_POLL_INTERVAL);

        let task = tokio::spawn(async move {
            let mut stopped = signal.clone();
            let mut ticker = tokio::time::interval(poll_interval);
            // The first tick of `interval` completes immediately
            ticker.reset();
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = stopped.wait() => {
                        debug!("Readiness watcher stopped");
                        return WatchOutcome::Stopped;
                    }
                    _ = ticker.tick() => {
                        if !is_serving() {
                            debug!("Listener no longer serving, readiness watcher exiting");
                            return WatchOutcome::Stopped;
                        }

                        if gate.is_enabled() {
                            info!("Health check enabled successfully");
                            return WatchOutcome::Satisfied;
                        }

                        let now = Instant::now();
                        if deadline.is_some_and(|deadline| now > deadline) {
                            let escalated = signal.unless_stopped(|| {
                                let failure = FatalError::ReadinessTimeout {
                                    timeout: settings.timeout,
                                };
                                error!(timeout = ?settings.timeout, "{}", failure);
                                escalation.escalate(&failure);
                            });
                            return match escalated {
                                Some(()) => WatchOutcome::Escalated,
                                None => WatchOutcome::Stopped,
                            };
                        }

                        warn!(
                            remaining = ?deadline.map(|deadline| deadline.saturating_duration_since(now)),
                            "Health check still not enabled - waiting"
                        );
                    }
                }
            }
        });

        Self { stop, task }
    }

    /// Ask the watcher to exit
    ///
    /// Does not wait for the task. Safe to call repeatedly and from any
    /// thread; returns true only for the call that delivered the signal.
    /// After this returns the watcher will never escalate.
    pub fn stop(&self) -> bool {
        self.stop.stop()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the task and return how it ended
    ///
    /// Returns None if the task panicked or was cancelled.
    pub async fn outcome(self) -> Option<WatchOutcome> {
        self.task.await.ok()
    }
}
