//! OS signal handling.
//!
//! SIGINT and SIGTERM both request a graceful shutdown. The listener is a
//! single long-lived task that forwards the first signal to the
//! [`ShutdownCoordinator`] and exits.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::lifecycle::shutdown::ShutdownCoordinator;

/// Wait for the first termination signal and return its name.
pub async fn wait_for_termination() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = interrupt.recv() => Ok("SIGINT"),
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("ctrl-c")
    }
}

/// Spawn the signal listener task.
///
/// If the handlers cannot be installed the error is logged and shutdown is
/// triggered immediately; a server that cannot be stopped cleanly should
/// not start serving.
pub fn spawn_signal_listener(coordinator: Arc<ShutdownCoordinator>) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            signal = wait_for_termination() => match signal {
                Ok(name) => {
                    tracing::info!(signal = name, "Shutdown signal received");
                    coordinator.trigger(name);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install signal handlers");
                    coordinator.trigger("signal handler installation failed");
                }
            },
            // Shutdown started elsewhere; nothing left to listen for.
            _ = coordinator.triggered() => {}
        }
    })
}
