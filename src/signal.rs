// ABOUTME: Termination signal handling for graceful and forced shutdown
// ABOUTME: First SIGINT/SIGTERM drains the server, a second one exits immediately

use std::future::Future;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Exit status used when a second signal forces the process down
pub const FORCED_EXIT_CODE: i32 = 130;

/// Wait for shutdown signal (SIGTERM or Ctrl+C)
pub async fn termination() {
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
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// Resolves on the first signal and arms the forced exit for the next one
pub async fn graceful_shutdown() {
    shutdown_sequence(termination(), termination(), || {
        std::process::exit(FORCED_EXIT_CODE);
    })
    .await;
}

/// Wait for `first`, then run `exit` in the background once `second` fires.
/// The returned handle belongs to the background watcher.
pub async fn shutdown_sequence<F, S, X>(first: F, second: S, exit: X) -> JoinHandle<()>
where
    F: Future<Output = ()>,
    S: Future<Output = ()> + Send + 'static,
    X: FnOnce() + Send + 'static,
{
    first.await;
    info!("shutting down gracefully, press Ctrl+C again to force");

    tokio::spawn(async move {
        second.await;
        warn!("Second signal received, forcing exit");
        exit();
    })
}
