//! TCP Accept Loop
//!
//! Accepts clients and runs each one in its own task inside a `JoinSet`.
//! A panicking connection task is reaped and logged without touching the
//! listener or any other client. When the shutdown future resolves the loop
//! stops accepting and aborts every connection still open.

use crate::commands::CommandHandler;
use crate::connection::{handle_connection, ConnectionStats};
use crate::storage::Keyspace;
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Serves clients on `listener` until `shutdown` completes.
pub async fn run(
    listener: TcpListener,
    keyspace: Arc<Keyspace>,
    shutdown: impl Future,
) -> std::io::Result<()> {
    let local_addr = listener.local_addr()?;
    let handler = CommandHandler::new(keyspace);
    let stats = Arc::new(ConnectionStats::new());
    let mut connections = JoinSet::new();

    info!(addr = %local_addr, "Ready to accept connections");
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping server");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        error!(client = %addr, error = %e, "Failed to set TCP_NODELAY");
                    }
                    connections.spawn(handle_connection(
                        stream,
                        addr,
                        handler.clone(),
                        Arc::clone(&stats),
                    ));
                }
                Err(e) => error!(error = %e, "Failed to accept connection"),
            },
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!(error = %e, "Connection task panicked");
                    }
                }
            }
        }
    }

    let open = connections.len();
    connections.shutdown().await;

    info!(
        closed_connections = open,
        connections_accepted = stats.connections_accepted.load(Ordering::Relaxed),
        commands_processed = stats.commands_processed.load(Ordering::Relaxed),
        "Server stopped"
    );
    Ok(())
}
