//! Storage Module
//!
//! - `keyspace`: the shared key → (value, expiry) map with lazy expiry
//! - `expiry`: the background sweeper (active expiry)
//! - `glob`: pattern matching for `KEYS`
//!
//! ```
//! use cinderkv::storage::Keyspace;
//! use bytes::Bytes;
//!
//! let keyspace = Keyspace::new();
//! keyspace.set(Bytes::from("abc"), Bytes::from("1"), None);
//! keyspace.set(Bytes::from("abbc"), Bytes::from("2"), None);
//! assert_eq!(keyspace.keys("a?c"), vec![Bytes::from("abc")]);
//! ```

pub mod expiry;
pub mod glob;
pub mod keyspace;

pub use expiry::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper};
pub use glob::GlobPattern;
pub use keyspace::{Entry, Keyspace, KeyspaceConfig};
