use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Install a shutdown handler that listens for ctrl-c and SIGTERM.
///
/// Returns a `CancellationToken` that is cancelled when either arrives. The
/// fairness controller and any driver loops select on this token and drain
/// cleanly; the policy server itself needs no signal, it stops with the
/// process.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let handler_token = token.clone();

    tokio::spawn(async move {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received ctrl-c, shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, shutting down");
            }
        }

        handler_token.cancel();
    });

    token
}
