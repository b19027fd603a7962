//! Graceful shutdown: one cancellation token fans out to the listener and
//! every connection task, each of which logs its session out on the way down.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ShutdownManager {
    cancel_token: CancellationToken,
    task_handles: Vec<JoinHandle<()>>,
    timeout: Duration,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
            task_handles: Vec::new(),
            timeout: SHUTDOWN_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn register_task(&mut self, handle: JoinHandle<()>) {
        self.task_handles.push(handle);
    }

    /// Block until ctrl+c, SIGTERM, or something else cancels the token,
    /// then shut down.
    pub async fn wait_for_shutdown(self) -> bool {
        tokio::select! {
            _ = terminate_signal() => tracing::info!("🛑 Shutdown signal received"),
            _ = self.cancel_token.cancelled() => tracing::info!("🛑 Shutdown requested"),
        }
        self.shutdown().await
    }

    /// Cancel every task and wait for them. Returns false if some did not
    /// finish in time.
    pub async fn shutdown(mut self) -> bool {
        self.cancel_token.cancel();

        let handles = std::mem::take(&mut self.task_handles);
        let all_done = async {
            for handle in handles {
                if let Err(e) = handle.await {
                    tracing::warn!("Task ended abnormally: {}", e);
                }
            }
        };

        match tokio::time::timeout(self.timeout, all_done).await {
            Ok(()) => {
                tracing::info!("✓ All tasks shut down gracefully");
                true
            }
            Err(_) => {
                tracing::warn!("⏱️  Shutdown timeout: Some tasks did not complete");
                false
            }
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::error!("Failed to listen for SIGTERM: {}", e);
            ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    ctrl_c().await;
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
