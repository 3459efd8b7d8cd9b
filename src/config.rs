//! Command-line configuration for the server binary.

use crate::storage::{ExpiryConfig, KeyspaceConfig};
use crate::{DEFAULT_HOST, DEFAULT_PORT};
use clap::Parser;
use std::time::Duration;

/// CinderKV server
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "cinderkv")]
#[command(about = "In-memory key-value server speaking the Redis protocol")]
#[command(version)]
pub struct Config {
    /// Host to bind to
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory holding the snapshot file
    #[arg(long, default_value = ".")]
    pub dir: String,

    /// Snapshot file name inside `dir`; empty disables loading
    #[arg(long, default_value = "dump.rdb")]
    pub dbfilename: String,

    /// Milliseconds between background expiry sweeps
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    pub expiry_interval_ms: u64,
}

impl Config {
    /// Returns the bind address as `host:port`
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn expiry_config(&self) -> ExpiryConfig {
        ExpiryConfig {
            interval: Duration::from_millis(self.expiry_interval_ms),
        }
    }

    pub fn keyspace_config(&self) -> KeyspaceConfig {
        KeyspaceConfig {
            dir: self.dir.clone(),
            dbfilename: self.dbfilename.clone(),
        }
    }
}
