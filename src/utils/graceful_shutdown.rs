use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use eyre::Result;
use tokio::{signal, sync::broadcast};

/// Fans a single shutdown decision out to every interested task: the serve
/// loop, the config watcher and the limiter sweeper all subscribe.
pub struct GracefulShutdown {
    shutdown_tx: broadcast::Sender<()>,
    shutdown_initiated: Arc<AtomicBool>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Relaxed)
    }

    /// Trigger shutdown programmatically. Idempotent; only the first call
    /// broadcasts.
    pub fn trigger(&self) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            let _ = self.shutdown_tx.send(());
        }
    }

    /// Block until SIGINT or SIGTERM, then broadcast shutdown.
    pub async fn run_signal_handler(&self) -> Result<()> {
        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("received SIGINT, initiating graceful shutdown");
            }
            _ = wait_for_sigterm() => {
                tracing::info!("received SIGTERM, initiating graceful shutdown");
            }
        }
        self.trigger();
        Ok(())
    }

    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            receiver: self.shutdown_tx.subscribe(),
            shutdown_initiated: self.shutdown_initiated.clone(),
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to register SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    // Only Ctrl+C is available off Unix.
    std::future::pending::<()>().await;
}

/// A cloneable handle a task can await shutdown on.
pub struct ShutdownToken {
    receiver: broadcast::Receiver<()>,
    shutdown_initiated: Arc<AtomicBool>,
}

impl Clone for ShutdownToken {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.resubscribe(),
            shutdown_initiated: self.shutdown_initiated.clone(),
        }
    }
}

impl ShutdownToken {
    pub fn is_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Relaxed)
    }

    /// Wait for the shutdown broadcast. A closed or lagged channel counts as
    /// shutdown.
    pub async fn wait(&mut self) {
        let _ = self.receiver.recv().await;
    }
}
