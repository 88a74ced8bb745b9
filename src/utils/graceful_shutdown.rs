use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{signal, sync::broadcast};

/// Default time in-flight connections get to finish after shutdown starts
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Why the server is stopping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// Triggered from code (tests, embedding applications)
    Requested,
    /// The shutdown channel went away
    Force,
}

/// Broadcasts a single shutdown event to the accept loop and every connection
#[derive(Debug)]
pub struct GracefulShutdown {
    shutdown_tx: broadcast::Sender<ShutdownReason>,
    shutdown_initiated: Arc<AtomicBool>,
    drain_timeout: Duration,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_DRAIN_TIMEOUT)
    }

    /// Create a manager whose connections get `drain_timeout` to finish
    pub fn with_timeout(drain_timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            drain_timeout,
        }
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    /// Start shutdown. Only the first call has an effect.
    pub fn trigger(&self, reason: ShutdownReason) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::info!(?reason, "Shutdown initiated");
            // No receivers just means nothing is running yet; the flag covers it.
            let _ = self.shutdown_tx.send(reason);
        } else {
            tracing::debug!(?reason, "Shutdown already initiated, ignoring");
        }
    }

    /// Wait for SIGINT or SIGTERM and trigger shutdown
    pub async fn run_signal_handler(&self) {
        tracing::info!("Signal handler started, listening for SIGINT and SIGTERM");

        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                    return;
                }
                self.trigger(ShutdownReason::Interrupt);
            }
            _ = wait_for_sigterm() => {
                self.trigger(ShutdownReason::Terminate);
            }
        }
    }

    /// Token for tasks that must stop when shutdown starts
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
            tracing::error!(error = %e, "Failed to register SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}

/// Receiving side of a [`GracefulShutdown`]
#[derive(Debug)]
pub struct ShutdownToken {
    receiver: broadcast::Receiver<ShutdownReason>,
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
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    /// Resolve once shutdown starts, immediately if it already has
    pub async fn wait(&mut self) -> ShutdownReason {
        if self.is_shutdown_initiated() {
            return self.receiver.try_recv().unwrap_or(ShutdownReason::Requested);
        }
        match self.receiver.recv().await {
            Ok(reason) => reason,
            Err(broadcast::error::RecvError::Lagged(_)) => ShutdownReason::Requested,
            Err(broadcast::error::RecvError::Closed) => ShutdownReason::Force,
        }
    }
}
