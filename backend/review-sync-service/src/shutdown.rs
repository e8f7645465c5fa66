//! Process signals that start a graceful drain.

use std::io;

#[cfg(unix)]
use tokio::signal::unix::{signal, Signal, SignalKind};

/// SIGINT and, on unix, SIGTERM (what container runtimes send on stop).
///
/// Handlers are installed by [`ShutdownSignals::install`], so a signal that
/// arrives before [`ShutdownSignals::recv`] is polled is not lost.
pub struct ShutdownSignals {
    #[cfg(unix)]
    terminate: Signal,
}

impl ShutdownSignals {
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Wait for the first shutdown signal and return its name.
    pub async fn recv(&mut self) -> io::Result<&'static str> {
        #[cfg(unix)]
        {
            tokio::select! {
                result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
                _ = self.terminate.recv() => Ok("SIGTERM"),
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.map(|()| "SIGINT")
        }
    }
}
