use tokio::signal::unix::{self, SignalKind};
use tracing::info;

/// The reason the process is shutting down, reported as the process exit
/// path (not its own exit code — the binary always exits 0 on a clean
/// shutdown signal per the external-interfaces contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGQUIT: finish in-flight requests, then stop accepting new ones.
    GracefulUpgrade,
    /// SIGTERM: finish in-flight requests, then stop accepting new ones.
    GracefulTerminate,
    /// SIGINT: stop immediately.
    Fast,
}

/// Waits for one of the three shutdown signals this proxy honors.
pub async fn wait_for_shutdown_signal() -> ShutdownReason {
    let mut quit = unix::signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");
    let mut term =
        unix::signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut int =
        unix::signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = quit.recv() => {
            info!("received SIGQUIT, upgrading gracefully");
            ShutdownReason::GracefulUpgrade
        }
        _ = term.recv() => {
            info!("received SIGTERM, terminating gracefully");
            ShutdownReason::GracefulTerminate
        }
        _ = int.recv() => {
            info!("received SIGINT, shutting down immediately");
            ShutdownReason::Fast
        }
    }
}
