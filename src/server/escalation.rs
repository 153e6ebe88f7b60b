//! Fatal escalation for failures discovered after start
//!
//! There is no synchronous caller left to receive these errors, so they are
//! handed to an [`Escalation`] strategy. The default aborts the process.

use std::time::Duration;
use thiserror::Error;
use tracing::error;

/// Unrecoverable conditions raised by background tasks
#[derive(Debug, Error)]
pub enum FatalError {
    #[error(
        "Readiness not enabled within {timeout:?} - call enable_readiness() once initialization completes"
    )]
    ReadinessTimeout { timeout: Duration },

    #[error("Telemetry listener failed after bind: {0}")]
    ListenerFailed(#[source] std::io::Error),
}

/// Strategy invoked for a [`FatalError`]
///
/// Implementations are called from background tasks while internal guards may
/// be held, so they must return (or terminate) promptly.
pub trait Escalation: Send + Sync {
    fn escalate(&self, failure: &FatalError);
}

/// Default escalation: log and abort the process
#[derive(Debug, Clone, Copy, Default)]
pub struct AbortProcess;

impl Escalation for AbortProcess {
    fn escalate(&self, failure: &FatalError) {
        error!(error = %failure, "Fatal telemetry failure, aborting process");
        std::process::abort();
    }
}
