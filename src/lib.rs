//! Embeddable observability sidecar
//!
//! Runs an internal HTTP endpoint set next to a host application:
//! - `/` - service name, version and status
//! - `/_hc` - readiness gate (503 until the application enables it)
//! - `/metrics` - Prometheus exposition
//! - `/debug/pprof/*` - profiling endpoints
//!
//! The application must call [`TelemetryServer::enable_readiness`] within the
//! configured timeout after [`TelemetryServer::start`], otherwise the process
//! is terminated.

pub mod config;
pub mod metrics;
pub mod server;

pub use config::{ConfigError, ServerConfig, ServiceInfo};
pub use metrics::{MetricsBackend, MetricsConfig, MetricsError, PrometheusMetrics};
pub use server::{
    AbortProcess, Escalation, FatalError, Lifecycle, ReadinessGate, ServerError,
    TelemetryServer, TelemetryServerBuilder,
};
