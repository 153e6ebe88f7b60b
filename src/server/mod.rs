//! Telemetry HTTP server
//!
//! - `health` - readiness gate and endpoint handlers
//! - `watcher` - enforces that readiness is enabled within a deadline
//! - `listener` - socket ownership, background serving, graceful drain
//! - `telemetry` - lifecycle supervisor tying the pieces together

mod escalation;
mod health;
mod listener;
mod profiling;
pub mod stop;
mod telemetry;
mod watcher;

pub use escalation::{AbortProcess, Escalation, FatalError};
pub use health::{build_router, CheckFn, Readiness, ReadinessGate, ServerState};
pub use listener::{Listener, DRAIN_TIMEOUT};
pub use profiling::{default_profiling_router, AVAILABLE_PROFILES};
pub use stop::{stop_channel, wait_for_termination, StopHandle, StopSignal};
pub use telemetry::{Lifecycle, TelemetryServer, TelemetryServerBuilder};
pub use watcher::{ReadinessWatcher, WatchOutcome, WatchSettings};

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced synchronously by the telemetry server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid listen address {address:?}: expected host:port")]
    InvalidAddress { address: String },

    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Telemetry server has been stopped and cannot be restarted")]
    Stopped,

    #[error("Connections still open after {0:?} drain timeout")]
    DrainTimeout(Duration),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Metrics(#[from] crate::metrics::MetricsError),
}

#[cfg(test)]
mod test_support;

#[cfg(test)]
#[path = "health_test.rs"]
mod health_tests;

#[cfg(test)]
#[path = "watcher_test.rs"]
mod watcher_tests;

#[cfg(test)]
#[path = "listener_test.rs"]
mod listener_tests;

#[cfg(test)]
#[path = "telemetry_test.rs"]
mod telemetry_tests;

#[cfg(test)]
#[path = "stop_test.rs"]
mod stop_tests;
