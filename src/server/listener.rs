//! Listener lifecycle: bind, serve in the background, drain on shutdown
//!
//! `start` returns once the socket is bound, so the OS-assigned port is
//! known immediately when listening on port 0. Serving continues on a
//! background task until `shutdown`.

use crate::server::escalation::{Escalation, FatalError};
use crate::server::ServerError;
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Time allowed for in-flight requests to finish during shutdown
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

struct Serving {
    trigger: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Owns the listening socket and the serve task
pub struct Listener {
    router: Router,
    escalation: Arc<dyn Escalation>,
    drain_timeout: Duration,
    bound: RwLock<Option<SocketAddr>>,
    running: Arc<AtomicBool>,
    serving: Mutex<Option<Serving>>,
}

impl Listener {
    pub fn new(router: Router, escalation: Arc<dyn Escalation>) -> Self {
        Self {
            router,
            escalation,
            drain_timeout: DRAIN_TIMEOUT,
            bound: RwLock::new(None),
            running: Arc::new(AtomicBool::new(false)),
            serving: Mutex::new(None),
        }
    }

    /// Override the shutdown drain window
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Bind `address` and start serving in the background
    ///
    /// Returns the bound address. If already serving, returns the current
    /// bound address without rebinding.
    pub async fn start(&self, address: &str) -> Result<SocketAddr, ServerError> {
        let mut serving = self.serving.lock().await;
        if serving.is_some() {
            if let Some(addr) = self.bound_address() {
                return Ok(addr);
            }
        }

        let bind_address = normalize_address(address)?;
        *self.bound.write().unwrap_or_else(PoisonError::into_inner) = None;

        let listener = TcpListener::bind(&bind_address)
            .await
            .map_err(|source| ServerError::Bind {
                address: bind_address.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            address: bind_address.clone(),
            source,
        })?;

        *self.bound.write().unwrap_or_else(PoisonError::into_inner) = Some(local_addr);
        self.running.store(true, Ordering::SeqCst);
        // Log after successful bind - server is actually listening
        info!(address = %local_addr, "Telemetry server listening");

        let (trigger, shutdown) = oneshot::channel::<()>();
        let router = self.router.clone();
        let running = Arc::clone(&self.running);
        let escalation = Arc::clone(&self.escalation);

        let task = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown.await;
                })
                .await;
            serve_exited(result, &running, escalation.as_ref());
        });

        *serving = Some(Serving { trigger, task });
        Ok(local_addr)
    }

    /// Stop accepting connections and wait for in-flight requests
    ///
    /// Requests still running after the drain timeout are dropped and
    /// `DrainTimeout` is returned. No-op if not serving.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        let Some(Serving { trigger, mut task }) = self.serving.lock().await.take() else {
            return Ok(());
        };

        let _ = trigger.send(());
        let result = match tokio::time::timeout(self.drain_timeout, &mut task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(error = %e, "Telemetry serve task ended abnormally");
                Ok(())
            }
            Err(_) => {
                warn!(timeout = ?self.drain_timeout, "Drain timeout exceeded, dropping connections");
                task.abort();
                Err(ServerError::DrainTimeout(self.drain_timeout))
            }
        };

        self.running.store(false, Ordering::SeqCst);
        result
    }

    /// Resolved listening address, None before the first bind
    pub fn bound_address(&self) -> Option<SocketAddr> {
        *self.bound.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the serve loop is active
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Shared view of the running flag, for tasks that outlive a borrow
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }
}

/// Record the end of the serve loop, escalating if it ended with an error
///
/// Backstop only: axum retries accept errors internally, so with the current
/// `TcpListener` the serve future resolves `Ok` once shutdown completes.
fn serve_exited(result: std::io::Result<()>, running: &AtomicBool, escalation: &dyn Escalation) {
    running.store(false, Ordering::SeqCst);

    if let Err(e) = result {
        error!(error = %e, "Telemetry server failed");
        escalation.escalate(&FatalError::ListenerFailed(e));
    }
}

/// Turn a `host:port` listen address into something `TcpListener::bind` accepts
///
/// An empty host (`":28080"`) means all interfaces.
fn normalize_address(address: &str) -> Result<String, ServerError> {
    let address = address.trim();
    let invalid = || ServerError::InvalidAddress {
        address: address.to_string(),
    };

    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    port.parse::<u16>().map_err(|_| invalid())?;

    if host.is_empty() {
        Ok(format!("0.0.0.0:{}", port))
    } else if host.contains(':') && !host.starts_with('[') {
        // Bare IPv6 host without brackets is ambiguous
        Err(invalid())
    } else {
        Ok(address.to_string())
    }
}
