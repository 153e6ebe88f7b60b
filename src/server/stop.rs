//! Stop signalling for background tasks and process termination
//!
//! A [`StopHandle`] raises the signal once; every cloned [`StopSignal`]
//! observes it. Also provides [`wait_for_termination`] for SIGTERM/SIGINT.

use tokio::sync::watch;
use tracing::info;

/// Receiving side of a stop channel
#[derive(Clone)]
pub struct StopSignal {
    receiver: watch::Receiver<bool>,
}

impl StopSignal {
    /// Wait until stop is raised
    pub async fn wait(&mut self) {
        while !*self.receiver.borrow_and_update() {
            if self.receiver.changed().await.is_err() {
                // Handle dropped without stopping: nobody can stop us any more
                std::future::pending::<()>().await;
            }
        }
    }

    /// Check if stop was raised (non-blocking)
    pub fn is_stopped(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Run `f` only if stop has not been raised
    ///
    /// The channel read guard is held while `f` runs, so a concurrent
    /// [`StopHandle::stop`] blocks until `f` returns. Once `stop()` has
    /// returned, `f` is never run. `f` must not block for long.
    pub fn unless_stopped<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let stopped = self.receiver.borrow();
        if *stopped {
            None
        } else {
            Some(f())
        }
    }
}

/// Sending side of a stop channel
pub struct StopHandle {
    sender: watch::Sender<bool>,
}

impl StopHandle {
    /// Raise the stop signal
    ///
    /// Returns true if this call delivered the signal, false if it had
    /// already been raised.
    pub fn stop(&self) -> bool {
        self.sender.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        })
    }

    pub fn is_stopped(&self) -> bool {
        *self.sender.borrow()
    }
}

/// Create a new stop channel
///
/// Returns (handle, signal) where:
/// - handle: raises the signal, exactly once
/// - signal: cloned and passed to tasks that need to observe it
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (sender, receiver) = watch::channel(false);
    (StopHandle { sender }, StopSignal { receiver })
}

/// Wait for SIGTERM or SIGINT
///
/// Returns the name of the signal received.
#[cfg(unix)]
pub async fn wait_for_termination() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    info!(signal = name, "Received termination signal");
    Ok(name)
}

/// Wait for Ctrl+C (non-Unix)
#[cfg(not(unix))]
pub async fn wait_for_termination() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C");
    Ok("CTRL_C")
}
