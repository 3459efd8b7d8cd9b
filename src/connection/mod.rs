//! Connection Handling
//!
//! One async task per client. The accept loop lives in [`crate::server`];
//! this module covers what happens after `accept()`.
//!
//! ```ignore
//! use cinderkv::connection::{handle_connection, ConnectionStats};
//! use cinderkv::commands::CommandHandler;
//! use cinderkv::storage::Keyspace;
//! use std::sync::Arc;
//!
//! let handler = CommandHandler::new(Arc::new(Keyspace::new()));
//! let stats = Arc::new(ConnectionStats::new());
//!
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(stream, addr, handler, stats));
//! ```

pub mod handler;

pub use handler::{
    handle_connection, ConnectionError, ConnectionHandler, ConnectionStats, READ_CHUNK_SIZE,
};
