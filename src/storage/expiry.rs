//! Background Expiry Sweeper
//!
//! Lazy expiry only reclaims a key when someone reads it. The sweeper is the
//! "active" half: a tokio task that wakes at a fixed interval and removes
//! every expired entry in one pass.
//!
//! The task lives until its [`ExpirySweeper`] handle is stopped or dropped.

use crate::storage::Keyspace;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryConfig {
    /// Time between sweeps (default: 1s)
    pub interval: Duration,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

/// A handle to the running expiry sweeper.
///
/// Dropping the handle stops the task at its next wake-up.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ExpirySweeper {
    /// Spawns the sweeper task. Must be called inside a tokio runtime.
    pub fn start(keyspace: Arc<Keyspace>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(interval_ms = config.interval.as_millis() as u64, "Background expiry sweeper started");
        let task = tokio::spawn(sweeper_loop(keyspace, config, shutdown_rx));

        Self {
            shutdown_tx,
            task: Some(task),
        }
    }

    /// Signals the task to stop. Idempotent.
    pub fn stop(&self) {
        if !self.shutdown_tx.send_replace(true) {
            info!("Background expiry sweeper stopped");
        }
    }

    /// Signals the task to stop and waits for it to finish.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Expiry sweeper task ended abnormally");
            }
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop(
    keyspace: Arc<Keyspace>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let expired = keyspace.cleanup_expired();
        if expired > 0 {
            debug!(
                expired = expired,
                keys_remaining = keyspace.len(),
                "Expired keys cleaned up"
            );
        } else {
            trace!("Expiry sweep found nothing");
        }
    }
}

/// Starts the expiry sweeper with default configuration.
pub fn start_expiry_sweeper(keyspace: Arc<Keyspace>) -> ExpirySweeper {
    ExpirySweeper::start(keyspace, ExpiryConfig::default())
}
