//! Interrupt handling.
//!
//! SIGINT/SIGTERM (Ctrl+C on Windows) set a process-wide flag. Long
//! operations poll it between steps: `setup` stops the services it
//! started and exits, `monitor` leaves its refresh loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

#[inline]
pub fn is_shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Relaxed)
}

pub fn request_shutdown() {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

/// Spawns the listener task on creation. Requires a running Tokio runtime.
pub struct ShutdownGuard {
    _marker: (),
}

impl ShutdownGuard {
    pub fn new() -> Self {
        tokio::spawn(listen());
        Self { _marker: () }
    }
}

impl Default for ShutdownGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn listen() {
    use tokio::signal::unix::{signal, SignalKind};

    let sigint = signal(SignalKind::interrupt())
        .map_err(|e| warn!("Failed to register SIGINT handler: {}", e))
        .ok();
    let sigterm = signal(SignalKind::terminate())
        .map_err(|e| warn!("Failed to register SIGTERM handler: {}", e))
        .ok();

    let name = match (sigint, sigterm) {
        (Some(mut int), Some(mut term)) => {
            tokio::select! {
                _ = int.recv() => "SIGINT",
                _ = term.recv() => "SIGTERM",
            }
        }
        (Some(mut int), None) => {
            int.recv().await;
            "SIGINT"
        }
        (None, Some(mut term)) => {
            term.recv().await;
            "SIGTERM"
        }
        (None, None) => {
            warn!("No signal handlers registered, interrupts will not be handled");
            return;
        }
    };
    info!("Received {}, shutting down...", name);
    request_shutdown();
}

#[cfg(not(unix))]
async fn listen() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, shutting down...");
            request_shutdown();
        }
        Err(e) => warn!("Failed to register Ctrl+C handler: {}", e),
    }
}

/// Cancellation flag for one task. Also reports cancelled once a
/// process-wide shutdown has been requested.
#[derive(Clone)]
pub struct ShutdownToken {
    flag: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed) || is_shutdown_requested()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_cancel_is_shared_between_clones() {
        let token = ShutdownToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_token_independent_of_other_tokens() {
        let a = ShutdownToken::new();
        let b = ShutdownToken::default();
        a.cancel();
        assert!(!b.is_cancelled() || is_shutdown_requested());
    }

    #[tokio::test]
    async fn test_guard_spawns_without_runtime_error() {
        let _guard = ShutdownGuard::new();
    }
}
