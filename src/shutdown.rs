//! Shutdown Handling
//!
//! Waits for whichever ends the process first: SIGTERM/SIGINT, an explicit
//! shutdown request, or an escalated configuration reload fault.

use crate::config::{ConfigError, ReloadEvent};
use crate::Result;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{info, warn};

/// Why the process is stopping
#[derive(Debug, Clone)]
pub enum ShutdownReason {
    /// SIGTERM, SIGINT or Ctrl+C
    Signal,
    /// [`ShutdownCoordinator::request_shutdown`] was called
    Requested,
    /// A configuration reload failed under the escalate policy
    ReloadFault(Arc<ConfigError>),
}

impl ShutdownReason {
    /// Faults end the process with a non-zero status
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::ReloadFault(_))
    }
}

/// Shutdown coordinator for the configuration process
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { shutdown_tx }
    }

    /// Receiver notified once shutdown has been requested
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Ask a running [`wait`](Self::wait) to return
    pub fn request_shutdown(&self) {
        if self.shutdown_tx.send(()).is_err() {
            warn!("Shutdown requested but nothing is waiting for it");
        }
    }

    /// Log reload outcomes until the process should stop
    pub async fn wait(&self, mut events: BroadcastStream<ReloadEvent>) -> Result<ShutdownReason> {
        let mut requested = self.shutdown_tx.subscribe();
        let signal = listen_for_signals();
        tokio::pin!(signal);

        loop {
            tokio::select! {
                result = &mut signal => {
                    result?;
                    return Ok(ShutdownReason::Signal);
                }
                _ = requested.recv() => {
                    info!("Shutdown requested");
                    return Ok(ShutdownReason::Requested);
                }
                Some(event) = events.next() => match event {
                    Ok(ReloadEvent::Applied { sections, file_path, .. }) => {
                        info!(
                            "Applied configuration from {} (delta={}, proc={})",
                            file_path.display(),
                            sections.core.delta,
                            sections.emailbot.proc
                        );
                    }
                    Ok(ReloadEvent::Rejected { error, .. }) => {
                        warn!("Configuration change rejected: {}", error);
                    }
                    Ok(ReloadEvent::Fatal { error, .. }) => {
                        return Ok(ShutdownReason::ReloadFault(error));
                    }
                    Err(BroadcastStreamRecvError::Lagged(missed)) => {
                        warn!("Missed {} configuration events", missed);
                    }
                },
            }
        }
    }
}

async fn listen_for_signals() -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("Received SIGINT, shutting down"),
        }
    }

    #[cfg(windows)]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down");
    }

    Ok(())
}
