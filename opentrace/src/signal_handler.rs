use anyhow::Result;
use tokio::signal::unix::{self, Signal, SignalKind};
use tracing::info;

#[derive(Debug, PartialEq, Eq)]
pub enum SignalEvent {
    /// SIGHUP
    ConfigReload,
    /// SIGTERM or SIGINT
    Shutdown,
}

/// Signal streams registered once, so signals arriving between two waits are not lost.
pub struct SignalHandler {
    hangup: Signal,
    terminate: Signal,
    interrupt: Signal,
}

impl SignalHandler {
    pub fn install() -> Result<Self> {
        Ok(Self {
            hangup: unix::signal(SignalKind::hangup())?,
            terminate: unix::signal(SignalKind::terminate())?,
            interrupt: unix::signal(SignalKind::interrupt())?,
        })
    }

    pub async fn next(&mut self) -> SignalEvent {
        tokio::select! {
            _ = self.hangup.recv() => {
                info!("SignalHandler: Received SIGHUP, reloading configuration.");
                SignalEvent::ConfigReload
            }
            _ = self.terminate.recv() => {
                info!("SignalHandler: Received SIGTERM, shutting down.");
                SignalEvent::Shutdown
            }
            _ = self.interrupt.recv() => {
                info!("SignalHandler: Received SIGINT (Ctrl+C), shutting down.");
                SignalEvent::Shutdown
            }
        }
    }
}
