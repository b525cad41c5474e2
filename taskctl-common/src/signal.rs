use tracing::info;

/// Resolves once SIGTERM or SIGINT is received. Mirrors
/// `cargo_shuttle::Shuttle::local_run`'s dual-signal select, generalized from
/// a CLI's per-runtime kill loop to a plain shutdown trigger for a long-lived
/// server process.
pub async fn shutdown_signal() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
    }
}
