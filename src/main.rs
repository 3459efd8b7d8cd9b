//! CinderKV server binary.
//!
//! Loads the configured snapshot, starts the expiry sweeper and serves
//! clients until Ctrl+C.

use anyhow::Context;
use cinderkv::storage::{ExpirySweeper, Keyspace};
use cinderkv::{server, snapshot, Config};
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();

    info!(version = cinderkv::VERSION, "CinderKV starting");

    let keyspace = Arc::new(Keyspace::with_config(config.keyspace_config()));

    // The server starts whatever the snapshot outcome
    match snapshot::bootstrap(&keyspace, &config.dir, &config.dbfilename) {
        Ok(_) => {}
        Err(e) if keyspace.is_empty() => {
            error!(dir = %config.dir, dbfilename = %config.dbfilename, error = %e, "Failed to load snapshot")
        }
        Err(e) => warn!(
            keys_loaded = keyspace.len(),
            error = %e,
            "Snapshot only partially loaded"
        ),
    }

    let sweeper = ExpirySweeper::start(Arc::clone(&keyspace), config.expiry_config());

    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    server::run(listener, keyspace, shutdown)
        .await
        .context("server loop failed")?;

    sweeper.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}
