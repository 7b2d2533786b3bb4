use std::fmt;
use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => f.write_str("SIGINT"),
            ShutdownSignal::Terminate => f.write_str("SIGTERM"),
        }
    }
}

async fn interrupt() -> ShutdownSignal {
    if let Err(err) = signal::ctrl_c().await {
        error!("Failed to listen for SIGINT: {}", err);
        std::future::pending::<()>().await;
    }
    ShutdownSignal::Interrupt
}

/// Resolves on the first SIGINT or SIGTERM. If a handler cannot be
/// installed that signal is never reported; the other one still is.
pub async fn wait_for_signal() -> ShutdownSignal {
    #[cfg(unix)]
    {
        let terminate = async {
            match unix_signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(err) => {
                    error!("Failed to create SIGTERM handler: {}", err);
                    std::future::pending::<()>().await;
                }
            }
            ShutdownSignal::Terminate
        };

        let received = tokio::select! {
            sig = interrupt() => sig,
            sig = terminate => sig,
        };
        info!("Received {}, initiating graceful shutdown", received);
        received
    }

    #[cfg(not(unix))]
    {
        let received = interrupt().await;
        info!("Received {}, initiating graceful shutdown", received);
        received
    }
}
