//! Readiness gate and the service info, health and metrics endpoints
//!
//! - `/` - Service name, version and status as JSON
//! - `/_hc` - Readiness: 503 "not enabled" until the application enables the
//!   gate, 503 "unhealthy" when a registered check fails, 200 "ok" otherwise
//! - `/metrics` - Exposition from the metrics backend
//! - `/debug/pprof/*` - Merged in from the profiling router

use crate::config::ServiceInfo;
use crate::metrics::MetricsBackend;
use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{error, info};

/// A named readiness probe. `Ok(())` means healthy.
pub type CheckFn = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Outcome of evaluating the readiness gate
#[derive(Debug)]
pub enum Readiness {
    Ready,
    NotEnabled,
    Unhealthy { check: String, error: anyhow::Error },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

#[derive(Default)]
struct GateInner {
    enabled: AtomicBool,
    checks: RwLock<BTreeMap<String, CheckFn>>,
}

/// Shared readiness state
///
/// Starts disabled. The application enables it once initialization is
/// complete; until then `/_hc` reports 503 regardless of the checks.
/// Clones share state.
#[derive(Clone, Default)]
pub struct ReadinessGate {
    inner: Arc<GateInner>,
}

impl ReadinessGate {
    /// Create a new gate (initially disabled, no checks)
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a check, replacing any existing check with the same name
    pub fn register_check<F>(&self, name: impl Into<String>, check: F)
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let name = name.into();
        info!(name = %name, "Registered health check");
        self.inner
            .checks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, Arc::new(check));
    }

    /// Enable the gate. Idempotent.
    pub fn enable(&self) {
        if !self.inner.enabled.swap(true, Ordering::SeqCst) {
            info!("Health check enabled");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Names of the registered checks, in evaluation order
    pub fn check_names(&self) -> Vec<String> {
        self.inner
            .checks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Evaluate readiness
    ///
    /// Checks are not run while the gate is disabled. Otherwise checks run
    /// against a snapshot of the registry, stopping at the first failure.
    pub fn evaluate(&self) -> Readiness {
        if !self.is_enabled() {
            return Readiness::NotEnabled;
        }

        let checks: Vec<(String, CheckFn)> = self
            .inner
            .checks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, check)| (name.clone(), Arc::clone(check)))
            .collect();

        for (name, check) in checks {
            if let Err(error) = check() {
                return Readiness::Unhealthy { check: name, error };
            }
        }

        Readiness::Ready
    }
}

impl fmt::Debug for ReadinessGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadinessGate")
            .field("enabled", &self.is_enabled())
            .field("checks", &self.check_names())
            .finish()
    }
}

/// State shared by the endpoint handlers
#[derive(Clone)]
pub struct ServerState {
    gate: ReadinessGate,
    service: Arc<ServiceInfo>,
    metrics: Arc<dyn MetricsBackend>,
}

impl ServerState {
    pub fn new(
        gate: ReadinessGate,
        service: ServiceInfo,
        metrics: Arc<dyn MetricsBackend>,
    ) -> Self {
        Self {
            gate,
            service: Arc::new(service),
            metrics,
        }
    }
}

/// Index endpoint body: service identity plus a status marker
#[derive(Debug, Serialize)]
struct ServiceStatus {
    #[serde(flatten)]
    service: ServiceInfo,
    status: &'static str,
}

/// Service info handler
async fn index(State(state): State<ServerState>) -> Json<ServiceStatus> {
    Json(ServiceStatus {
        service: ServiceInfo::clone(&state.service),
        status: "running",
    })
}

/// Readiness handler
///
/// Checks run on the blocking pool since probes are synchronous and may do I/O.
/// The failing check name is logged, never returned in the body.
async fn health_check(State(state): State<ServerState>) -> (StatusCode, &'static str) {
    let gate = state.gate.clone();
    match tokio::task::spawn_blocking(move || gate.evaluate()).await {
        Ok(Readiness::Ready) => (StatusCode::OK, "ok"),
        Ok(Readiness::NotEnabled) => (StatusCode::SERVICE_UNAVAILABLE, "not enabled"),
        Ok(Readiness::Unhealthy { check, error }) => {
            error!(
                service_name = %state.service.name,
                check_name = %check,
                error = %error,
                "Health check failed"
            );
            (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
        }
        Err(e) => {
            error!(
                service_name = %state.service.name,
                error = %e,
                "Health check panicked"
            );
            (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
        }
    }
}

/// Metrics handler
async fn metrics(State(state): State<ServerState>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(exposition) => (
            StatusCode::OK,
            [(CONTENT_TYPE, exposition.content_type)],
            exposition.body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

/// Build the router for all telemetry endpoints
///
/// `profiling` is merged as-is and is expected to serve `/debug/pprof/*`.
pub fn build_router(state: ServerState, profiling: Router) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/_hc", get(health_check))
        .route("/metrics", get(self::metrics))
        .with_state(state)
        .merge(profiling)
}
