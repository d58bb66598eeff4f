//! OS signal trigger for shutdown
//!
//! Bridges tokio's signal handling to the blocking [`ShutdownCoordinator`].

use super::{ShutdownCoordinator, ShutdownReport};
use crate::error::{LifecycleError, Result};
use tokio::signal;

/// Waits for SIGINT or SIGTERM and then runs the shutdown
///
/// # Example
///
/// ```rust,no_run
/// use lifecore::lifecycle::{ShutdownCoordinator, ShutdownHandler};
/// use lifecore::worker::TokioExecutor;
/// use std::sync::Arc;
///
/// # async fn run() {
/// let coordinator = ShutdownCoordinator::new(Arc::new(TokioExecutor::current()));
/// let handler = ShutdownHandler::new(coordinator);
///
/// tokio::spawn(async move {
///     if let Err(e) = handler.wait_for_shutdown().await {
///         tracing::error!("shutdown failed: {}", e);
///     }
///     std::process::exit(0);
/// });
/// # }
/// ```
#[derive(Clone)]
pub struct ShutdownHandler {
    coordinator: ShutdownCoordinator,
}

impl ShutdownHandler {
    pub fn new(coordinator: ShutdownCoordinator) -> Self {
        Self { coordinator }
    }

    /// Wait for a shutdown signal, then announce and perform the shutdown
    ///
    /// The shutdown itself blocks, so it runs on tokio's blocking pool.
    pub async fn wait_for_shutdown(&self) -> Result<ShutdownReport> {
        shutdown_signal().await;
        self.shutdown().await
    }

    /// Run the shutdown without waiting for a signal
    pub async fn shutdown(&self) -> Result<ShutdownReport> {
        tracing::info!("Starting graceful shutdown...");
        self.coordinator.announce_shutdown();

        let coordinator = self.coordinator.clone();
        let report = tokio::task::spawn_blocking(move || coordinator.perform_shutdown())
            .await
            .map_err(|e| LifecycleError::interrupted(format!("shutdown task failed: {e}")))??;

        if report.is_clean() {
            tracing::info!("Graceful shutdown complete");
        } else {
            tracing::warn!(
                failures = report.failures().len(),
                "Shutdown complete with failed hooks"
            );
        }
        Ok(report)
    }
}

/// Completes when SIGINT (Ctrl+C) or, on unix, SIGTERM is received
///
/// A signal whose handler cannot be installed is logged and never fires.
///
/// ```rust,no_run
/// use lifecore::lifecycle::shutdown_signal;
///
/// # async fn serve() {}
/// # async fn run() {
/// tokio::select! {
///     _ = shutdown_signal() => tracing::info!("Shutdown signal received"),
///     _ = serve() => {}
/// }
/// # }
/// ```
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
