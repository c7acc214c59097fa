//! Graceful Shutdown Handling
//!
//! Broadcasts a shutdown signal to the transport's accept loop and to every
//! connection task, then waits for the channel registry to drain.

use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::signal;
use tracing::{info, warn, debug};
use crate::transport::TcpTransport;
use crate::Result;

/// Shutdown coordinator that manages graceful shutdown process
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            shutdown_tx,
            timeout,
        }
    }

    /// Get a shutdown receiver for components to listen for shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Sender handed to the transport so it can subscribe per connection
    pub fn sender(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Broadcast the shutdown signal
    pub fn trigger(&self) {
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal: {}", e);
        }
    }

    /// Wait for SIGTERM/SIGINT, then broadcast shutdown
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
            }
        }

        #[cfg(windows)]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        self.trigger();
        Ok(())
    }

    /// Wait until every connection has closed and its channel is gone, or
    /// the timeout elapses. Returns whether the transport drained.
    pub async fn wait_for_connections(&self, transport: &TcpTransport) -> bool {
        let start_time = Instant::now();
        let registry = transport.bridge().registry();

        let mut last_count = transport.active_connections();
        info!("Waiting for {} active connections to close (timeout: {:?})", last_count, self.timeout);

        while (last_count > 0 || !registry.is_empty()) && start_time.elapsed() < self.timeout {
            tokio::time::sleep(Duration::from_millis(50)).await;

            let current_count = transport.active_connections();
            if current_count != last_count {
                debug!("Active connections: {} -> {}", last_count, current_count);
                last_count = current_count;
            }
        }

        let elapsed = start_time.elapsed();
        let stats = registry.stats();

        if transport.active_connections() == 0 && stats.active_channels == 0 {
            info!("All connections closed gracefully in {:?} ({} channels served)",
                  elapsed, stats.total_created);
            true
        } else {
            warn!("Shutdown timeout reached after {:?} with {} connections and {} channels still active",
                  elapsed, transport.active_connections(), stats.active_channels);
            false
        }
    }
}
