//! Graceful shutdown handling for SIGTERM and SIGINT.
//!
//! On a signal the shared cancellation token is cancelled. A backup in
//! flight then discards its artifacts without registering a recovery
//! point, and a recovery halts at its current stage.

use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shutdown coordinator
pub struct ShutdownCoordinator {
    token: CancellationToken,
    grace: Duration,
}

impl ShutdownCoordinator {
    pub fn new(grace: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            grace,
        }
    }

    /// Token observed by every job started under this coordinator.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait for SIGTERM or SIGINT, then cancel the token.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
            _ = self.token.cancelled() => {}
        }

        self.token.cancel();
    }

    /// Wait up to the grace period for `task` to wind down.
    pub async fn drain<T>(&self, task: tokio::task::JoinHandle<T>) {
        info!("Graceful shutdown initiated");
        match tokio::time::timeout(self.grace, task).await {
            Ok(Ok(_)) => info!("Graceful shutdown complete"),
            Ok(Err(e)) => tracing::error!("Task failed during shutdown: {}", e),
            Err(_) => tracing::warn!("Shutdown grace period of {}s elapsed, forcing exit", self.grace.as_secs()),
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_cancellation_reaches_tasks() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        let token = coordinator.token();

        let handle = tokio::spawn(async move {
            token.cancelled().await;
        });

        // An early cancel also ends the signal wait
        coordinator.token().cancel();
        coordinator.wait_for_signal().await;
        coordinator.drain(handle).await;
    }
}
