//! Telemetry server lifecycle
//!
//! Composes the readiness gate, readiness watcher and listener:
//!
//! ```text
//! NotStarted ──start──▶ Running ──stop──▶ Stopped
//! ```
//!
//! `start` while running and `stop` while not running are no-ops. `Stopped` is
//! terminal because stopping shuts the metrics backend down. Start and stop
//! are serialized, so concurrent callers see the finished transition.

use crate::config::{ServerConfig, ServiceInfo};
use crate::metrics::{MetricsBackend, MetricsConfig, PrometheusMetrics};
use crate::server::escalation::{AbortProcess, Escalation};
use crate::server::health::{build_router, ReadinessGate, ServerState};
use crate::server::listener::Listener;
use crate::server::ServerError;
use crate::server::profiling::default_profiling_router;
use crate::server::watcher::{ReadinessWatcher, WatchSettings};
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Externally visible lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    NotStarted,
    Running,
    Stopped,
}

enum State {
    NotStarted,
    Running(ReadinessWatcher),
    Stopped,
}

impl State {
    fn lifecycle(&self) -> Lifecycle {
        match self {
            State::NotStarted => Lifecycle::NotStarted,
            State::Running(_) => Lifecycle::Running,
            State::Stopped => Lifecycle::Stopped,
        }
    }
}

/// Internal observability server running alongside the host application
pub struct TelemetryServer {
    config: ServerConfig,
    gate: ReadinessGate,
    listener: Listener,
    metrics: Arc<dyn MetricsBackend>,
    escalation: Arc<dyn Escalation>,
    state: Mutex<State>,
}

impl TelemetryServer {
    pub fn builder(service: ServiceInfo) -> TelemetryServerBuilder {
        TelemetryServerBuilder::new(service)
    }

    /// Build a server from environment configuration with a default
    /// Prometheus backend
    pub fn from_env() -> Result<Self, ServerError> {
        let config = ServerConfig::from_env()?;
        TelemetryServerBuilder::new(ServiceInfo::from_env())
            .config(config)
            .build()
    }

    /// Register (or replace) a named readiness check
    pub fn register_check<F>(&self, name: impl Into<String>, check: F)
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.gate.register_check(name, check);
    }

    /// Declare the application initialized. Idempotent.
    pub fn enable_readiness(&self) {
        self.gate.enable();
    }

    pub fn is_readiness_enabled(&self) -> bool {
        self.gate.is_enabled()
    }

    /// The readiness gate, for sharing with other components
    pub fn readiness(&self) -> &ReadinessGate {
        &self.gate
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Start serving on the configured listen address
    pub async fn start(&self) -> Result<(), ServerError> {
        let address = self.config.listen_address.clone();
        self.start_with_address(&address).await
    }

    /// Start serving on `address`
    ///
    /// Returns once the socket is bound. The readiness watcher starts at the
    /// same time; the application then has the configured timeout to call
    /// [`enable_readiness`](Self::enable_readiness).
    pub async fn start_with_address(&self, address: &str) -> Result<(), ServerError> {
        let mut state = self.state.lock().await;
        match *state {
            State::Running(_) => {
                info!(address = %address, "Telemetry server already running");
                return Ok(());
            }
            State::Stopped => return Err(ServerError::Stopped),
            State::NotStarted => {}
        }

        info!(address = %address, "Starting internal telemetry server");
        self.listener.start(address).await?;

        let running = self.listener.running_flag();
        let watcher = ReadinessWatcher::spawn(
            self.gate.clone(),
            move || running.load(Ordering::SeqCst),
            WatchSettings {
                timeout: self.config.readiness_timeout,
                poll_interval: self.config.readiness_poll_interval,
            },
            Arc::clone(&self.escalation),
        );

        *state = State::Running(watcher);
        Ok(())
    }

    /// Stop serving
    ///
    /// Stops the watcher first so it cannot escalate mid-shutdown, drains the
    /// listener, then shuts down the metrics backend. The backend is shut
    /// down even when draining times out; the drain error is still returned.
    pub async fn stop(&self) -> Result<(), ServerError> {
        let mut state = self.state.lock().await;
        let watcher = match std::mem::replace(&mut *state, State::Stopped) {
            State::Running(watcher) => watcher,
            previous => {
                *state = previous;
                return Ok(());
            }
        };

        watcher.stop();

        info!("Shutting down internal telemetry server");
        let drained = self.listener.shutdown().await;
        if let Err(e) = &drained {
            warn!(error = %e, "Telemetry server did not drain cleanly");
        }

        self.metrics.shutdown();

        info!("Internal telemetry server stopped");
        drained
    }

    pub async fn state(&self) -> Lifecycle {
        self.state.lock().await.lifecycle()
    }

    /// Whether the listener is currently serving
    pub fn is_running(&self) -> bool {
        self.listener.is_running()
    }

    /// Resolved listen address, None before the first start
    pub fn bound_address(&self) -> Option<SocketAddr> {
        self.listener.bound_address()
    }

    /// Resolved listen port, 0 before the first start
    pub fn bound_port(&self) -> u16 {
        self.bound_address().map(|addr| addr.port()).unwrap_or(0)
    }
}

/// Builder for [`TelemetryServer`]
pub struct TelemetryServerBuilder {
    service: ServiceInfo,
    config: ServerConfig,
    metrics: Option<Arc<dyn MetricsBackend>>,
    profiling: Option<Router>,
    escalation: Arc<dyn Escalation>,
    drain_timeout: Option<Duration>,
}

impl TelemetryServerBuilder {
    pub fn new(service: ServiceInfo) -> Self {
        Self {
            service,
            config: ServerConfig::default(),
            metrics: None,
            profiling: None,
            escalation: Arc::new(AbortProcess),
            drain_timeout: None,
        }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an existing metrics backend instead of a fresh Prometheus registry
    pub fn metrics(mut self, metrics: Arc<dyn MetricsBackend>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Router serving `/debug/pprof/*`
    pub fn profiling(mut self, profiling: Router) -> Self {
        self.profiling = Some(profiling);
        self
    }

    /// Strategy for fatal background failures (default: abort the process)
    pub fn escalation(mut self, escalation: Arc<dyn Escalation>) -> Self {
        self.escalation = escalation;
        self
    }

    pub fn drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = Some(drain_timeout);
        self
    }

    pub fn build(self) -> Result<TelemetryServer, ServerError> {
        self.config.validate()?;

        let metrics: Arc<dyn MetricsBackend> = match self.metrics {
            Some(metrics) => metrics,
            None => Arc::new(PrometheusMetrics::new(
                &self.service,
                MetricsConfig::default(),
            )?),
        };

        let gate = ReadinessGate::new();
        let router = build_router(
            ServerState::new(gate.clone(), self.service, Arc::clone(&metrics)),
            self.profiling.unwrap_or_else(default_profiling_router),
        );

        let mut listener = Listener::new(router, Arc::clone(&self.escalation));
        if let Some(drain_timeout) = self.drain_timeout {
            listener = listener.with_drain_timeout(drain_timeout);
        }

        Ok(TelemetryServer {
            config: self.config,
            gate,
            listener,
            metrics,
            escalation: self.escalation,
            state: Mutex::new(State::NotStarted),
        })
    }
}
