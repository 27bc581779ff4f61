//! Graceful shutdown on SIGINT/SIGTERM.

use std::time::Duration;

use tokio::signal;
use tracing::{info, warn};

/// How long in-flight requests get to finish after a shutdown signal.
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

/// Completes on SIGINT (Ctrl+C) or SIGTERM.
pub async fn signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, starting graceful shutdown"),
        _ = terminate => info!("received SIGTERM, starting graceful shutdown"),
    }
}

/// Shutdown future for `axum::serve`. Once a signal arrives, the process is
/// forced down if draining takes longer than `deadline`.
pub async fn with_deadline(deadline: Duration) {
    signal().await;
    tokio::spawn(async move {
        tokio::time::sleep(deadline).await;
        warn!(secs = deadline.as_secs(), "forcing shutdown after timeout");
        std::process::exit(1);
    });
}
