//! Command Layer
//!
//! Receives decoded requests, executes them against the keyspace and
//! returns the reply value.
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  RESP Parser    │  (protocol module)
//! └────────┬────────┘
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! └────────┬────────┘
//!          ▼
//! ┌─────────────────┐
//! │    Keyspace     │  (storage module)
//! └─────────────────┘
//! ```

pub mod handler;

pub use handler::{CommandError, CommandHandler, CommandResult};
