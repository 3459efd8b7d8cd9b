//! RESP Protocol Implementation
//!
//! - `types`: the [`RespValue`] reply type and its serialization
//! - `command`: the decoded client request
//! - `parser`: incremental decoder for requests and replies
//!
//! ## Example
//!
//! ```
//! use cinderkv::protocol::{parse_command, RespValue};
//!
//! let (command, consumed) = parse_command(b"*1\r\n$4\r\nPING\r\n").unwrap().unwrap();
//! assert_eq!(command.name_upper(), "PING");
//! assert_eq!(consumed, 14);
//!
//! assert_eq!(RespValue::pong().serialize(), b"+PONG\r\n");
//! ```

pub mod command;
pub mod parser;
pub mod types;

pub use command::Command;
pub use parser::{parse_command, parse_message, ParseError, ParseResult, RespParser};
pub use types::RespValue;
