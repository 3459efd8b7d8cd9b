//! # CinderKV - An In-Memory Key-Value Server
//!
//! CinderKV speaks the Redis wire protocol (RESP), keeps string keys in
//! memory with optional millisecond expiry, and can seed its keyspace from
//! an RDB snapshot at startup.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            CinderKV                              │
//! │                                                                  │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐           │
//! │  │   server    │───>│ connection  │───>│  commands   │           │
//! │  │ (JoinSet)   │    │ (per task)  │    │ (dispatch)  │           │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘           │
//! │                            │                  │                  │
//! │                     ┌──────▼──────┐    ┌──────▼──────────────┐   │
//! │                     │  protocol   │    │  storage::Keyspace  │   │
//! │                     │ (RESP codec)│    │  Mutex<HashMap>     │   │
//! │                     └─────────────┘    └──────▲───────▲──────┘   │
//! │                                               │       │          │
//! │                          ┌────────────────────┘       │          │
//! │                   ┌──────┴──────┐          ┌──────────┴───────┐  │
//! │                   │  snapshot   │          │  ExpirySweeper   │  │
//! │                   │ (RDB load)  │          │  (tokio task)    │  │
//! │                   └─────────────┘          └──────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use cinderkv::storage::{start_expiry_sweeper, Keyspace};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let keyspace = Arc::new(Keyspace::new());
//!     let sweeper = start_expiry_sweeper(Arc::clone(&keyspace));
//!
//!     let listener = TcpListener::bind("127.0.0.1:6379").await?;
//!     cinderkv::server::run(listener, keyspace, tokio::signal::ctrl_c()).await?;
//!
//!     sweeper.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `PING [message]`
//! - `ECHO message`
//! - `SET key value [PX milliseconds]`
//! - `GET key`
//! - `CONFIG GET dir|dbfilename`
//! - `KEYS [pattern]`
//!
//! ## Expiry
//!
//! Keys with a TTL are expired in two ways:
//! 1. **Lazy**: a read that finds an expired entry removes it
//! 2. **Active**: a background task periodically removes every expired entry

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod snapshot;
pub mod storage;

pub use commands::CommandHandler;
pub use config::Config;
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{Command, ParseError, RespParser, RespValue};
pub use snapshot::{LoadSummary, SnapshotError};
pub use storage::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper, Keyspace};

/// The default port CinderKV listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host CinderKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of CinderKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
