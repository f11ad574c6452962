//! OS shutdown signals for the supervisor process.
//!
//! Unix listens for `SIGINT`, `SIGTERM` and `SIGQUIT`; Windows for Ctrl-C.
//! The child runs in its own process group, so none of these reach it
//! directly: the supervisor terminates it instead.

/// Completes when the supervisor receives a termination signal.
///
/// Returns `Err` if signal registration fails.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv()  => tracing::info!("Received SIGINT"),
        _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
        _ = sigquit.recv() => tracing::info!("Received SIGQUIT"),
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received Ctrl-C");
    Ok(())
}
