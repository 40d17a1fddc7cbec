use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::{signal, sync::broadcast};

/// Why the control plane is stopping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT or SIGTERM
    Signal,
    /// Requested from inside the process, e.g. a failed startup step
    Requested,
    /// The shutdown channel went away
    Force,
}

/// Broadcasts a single shutdown event to the API server and background tasks
pub struct GracefulShutdown {
    shutdown_tx: broadcast::Sender<ShutdownReason>,
    shutdown_initiated: Arc<AtomicBool>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(4);
        Self {
            shutdown_tx,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    /// Trigger shutdown. Only the first call has an effect.
    pub fn trigger_shutdown(&self, reason: ShutdownReason) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::info!("Shutdown initiated: {:?}", reason);
            // no receivers is fine, late tokens check the flag
            let _ = self.shutdown_tx.send(reason);
        } else {
            tracing::debug!("Shutdown already initiated, ignoring {:?}", reason);
        }
    }

    /// Wait for SIGINT or SIGTERM and trigger shutdown.
    pub async fn run_signal_handler(&self) {
        tracing::info!("Listening for SIGINT and SIGTERM");

        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!("Failed to listen for SIGINT: {}", e);
                }
                tracing::info!("Received SIGINT, shutting down");
            }
            _ = wait_for_sigterm() => {
                tracing::info!("Received SIGTERM, shutting down");
            }
        }
        self.trigger_shutdown(ShutdownReason::Signal);
    }

    /// A token background tasks hold to observe shutdown
    pub fn shutdown_token(&self) -> ShutdownToken {
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
            tracing::error!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}

/// Cancellation handle for one background task
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

    /// Resolves once shutdown has been triggered, including before this call.
    pub async fn wait_for_shutdown(&mut self) -> ShutdownReason {
        if self.is_shutdown_initiated() {
            return self.receiver.try_recv().unwrap_or(ShutdownReason::Requested);
        }
        match self.receiver.recv().await {
            Ok(reason) => reason,
            Err(_) => ShutdownReason::Force,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_trigger_reaches_tokens() {
        let shutdown = GracefulShutdown::new();
        let mut token = shutdown.shutdown_token();
        let mut clone = token.clone();
        assert!(!token.is_shutdown_initiated());

        shutdown.trigger_shutdown(ShutdownReason::Signal);

        assert_eq!(token.wait_for_shutdown().await, ShutdownReason::Signal);
        assert_eq!(clone.wait_for_shutdown().await, ShutdownReason::Signal);
    }

    #[tokio::test]
    async fn test_second_trigger_ignored() {
        let shutdown = GracefulShutdown::new();
        let mut token = shutdown.shutdown_token();
        shutdown.trigger_shutdown(ShutdownReason::Requested);
        shutdown.trigger_shutdown(ShutdownReason::Signal);
        assert_eq!(token.wait_for_shutdown().await, ShutdownReason::Requested);
    }

    #[tokio::test]
    async fn test_token_created_after_trigger() {
        let shutdown = GracefulShutdown::new();
        shutdown.trigger_shutdown(ShutdownReason::Signal);

        let mut late = shutdown.shutdown_token();
        let reason = tokio::time::timeout(Duration::from_millis(100), late.wait_for_shutdown())
            .await
            .unwrap();
        assert_eq!(reason, ShutdownReason::Requested);
    }

    #[tokio::test]
    async fn test_waiting_task_is_woken() {
        let shutdown = GracefulShutdown::new();
        let mut token = shutdown.shutdown_token();
        let waiter = tokio::spawn(async move { token.wait_for_shutdown().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.trigger_shutdown(ShutdownReason::Signal);

        assert_eq!(waiter.await.unwrap(), ShutdownReason::Signal);
    }
}
