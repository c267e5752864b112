use std::{future::Future, pin::Pin};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How [`Host::run`](super::Host::run) decides when to stop.
pub enum ShutdownOptions {
    /// Listen for OS signals (Ctrl+C / SIGTERM).
    Signals,
    /// An external `CancellationToken` controls the lifecycle.
    Token(CancellationToken),
    /// An arbitrary future; when it completes, we initiate shutdown.
    Future(Pin<Box<dyn Future<Output = ()> + Send>>),
}

impl std::fmt::Debug for ShutdownOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownOptions::Signals => f.write_str("Signals"),
            ShutdownOptions::Token(_) => f.write_str("Token"),
            ShutdownOptions::Future(_) => f.write_str("Future"),
        }
    }
}

/// Wait for Ctrl+C, or SIGTERM on unix.
///
/// # Errors
/// Returns an error if the signal handlers cannot be installed.
pub async fn wait_for_shutdown() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res,
            _ = sigterm.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

/// Spawn the waiter for the chosen strategy; it cancels `cancel` when shutdown is requested.
///
/// With [`ShutdownOptions::Token`] the caller's token is `cancel` itself, so nothing is spawned.
pub(super) fn spawn_waiter(
    shutdown: ShutdownOptions,
    cancel: &CancellationToken,
) -> Option<JoinHandle<()>> {
    match shutdown {
        ShutdownOptions::Signals => {
            let c = cancel.clone();
            Some(tokio::spawn(async move {
                match wait_for_shutdown().await {
                    Ok(()) => {
                        tracing::info!("shutdown: signal received");
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            "shutdown: primary waiter failed; falling back to ctrl_c()"
                        );
                        // Cross-platform fallback.
                        let _ = tokio::signal::ctrl_c().await;
                    }
                }
                c.cancel();
            }))
        }
        ShutdownOptions::Future(waiter) => {
            let c = cancel.clone();
            Some(tokio::spawn(async move {
                waiter.await;
                tracing::info!("shutdown: external future completed");
                c.cancel();
            }))
        }
        ShutdownOptions::Token(_) => {
            tracing::info!("shutdown: external token will control lifecycle");
            None
        }
    }
}
