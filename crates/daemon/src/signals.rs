//! Signal handling for the daemon.
//!
//! SIGTERM, SIGINT and Ctrl+C request a graceful shutdown. On Unix, SIGUSR1
//! requests an immediate sync run.

use tokio::sync::mpsc;
use tracing::{error, info};

/// Wait for a shutdown signal (SIGTERM, SIGINT, or Ctrl+C).
///
/// This function resolves once any termination signal is received.
pub async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("received SIGTERM");
        }
    }
}

/// Forward SIGUSR1 to the scheduler as an immediate-run request.
#[cfg(unix)]
pub fn spawn_trigger_listener(trigger_tx: mpsc::Sender<()>) {
    tokio::spawn(async move {
        let mut sig = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::user_defined1()) {
            Ok(sig) => sig,
            Err(e) => {
                error!(error = %e, "failed to install SIGUSR1 handler");
                return;
            }
        };
        while sig.recv().await.is_some() {
            info!("received SIGUSR1, requesting immediate sync");
            // A full channel already holds a pending request.
            let _ = trigger_tx.try_send(());
        }
    });
}

#[cfg(not(unix))]
pub fn spawn_trigger_listener(_trigger_tx: mpsc::Sender<()>) {}
