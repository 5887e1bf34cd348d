use tokio_util::sync::CancellationToken;

/// Register SIGINT, SIGTERM and SIGQUIT handling; cancel the run on the
/// first signal received.
pub async fn wait_for_signal(cancel: CancellationToken) {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to listen for SIGTERM");
    let mut sigquit = signal(SignalKind::quit()).expect("failed to listen for SIGQUIT");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            pw_info!(sys, signal = "SIGINT", "received signal, winding down");
        }
        _ = sigterm.recv() => {
            pw_info!(sys, signal = "SIGTERM", "received signal, winding down");
        }
        _ = sigquit.recv() => {
            pw_info!(sys, signal = "SIGQUIT", "received signal, winding down");
        }
    }
    cancel.cancel();
}
