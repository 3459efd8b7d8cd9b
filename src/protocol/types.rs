//! RESP reply values and their wire encoding.
//!
//! Every command produces exactly one [`RespValue`], which the connection
//! handler serializes straight onto the socket:
//!
//! | Variant        | Wire form                    |
//! |----------------|------------------------------|
//! | `SimpleString` | `+OK\r\n`                    |
//! | `Error`        | `-ERR syntax error\r\n`      |
//! | `Integer`      | `:42\r\n`                    |
//! | `BulkString`   | `$3\r\nbar\r\n`              |
//! | `Null`         | `$-1\r\n`                    |
//! | `Array`        | `*2\r\n$3\r\ndir\r\n$4\r\n/tmp\r\n` |

use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used throughout RESP.
pub const CRLF: &[u8] = b"\r\n";

/// RESP type prefixes.
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A typed RESP value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Non-binary-safe status line. CR and LF are written as spaces.
    SimpleString(String),

    /// Error reply. Same framing rules as a simple string.
    Error(String),

    /// Signed 64-bit integer.
    Integer(i64),

    /// Binary-safe string.
    BulkString(Bytes),

    /// The null bulk string, `$-1\r\n`.
    Null,

    /// Ordered sequence of values.
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Creates a simple string reply.
    ///
    /// ```
    /// use cinderkv::protocol::RespValue;
    /// assert_eq!(RespValue::simple_string("OK").serialize(), b"+OK\r\n");
    /// ```
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    /// Creates an error reply.
    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    /// Creates a bulk string reply.
    ///
    /// ```
    /// use cinderkv::protocol::RespValue;
    /// use bytes::Bytes;
    /// let bulk = RespValue::bulk_string(Bytes::from("bar"));
    /// assert_eq!(bulk.serialize(), b"$3\r\nbar\r\n");
    /// ```
    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    pub fn null() -> Self {
        RespValue::Null
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    /// An array made only of bulk strings, the shape used by `KEYS` and `CONFIG GET`.
    pub fn bulk_array<I, B>(items: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        RespValue::Array(items.into_iter().map(RespValue::bulk_string).collect())
    }

    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    /// Serializes the value into a fresh buffer.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the value onto the end of `buf`.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => write_status_line(buf, prefix::SIMPLE_STRING, s),
            RespValue::Error(s) => write_status_line(buf, prefix::ERROR, s),
            RespValue::Integer(n) => write_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            RespValue::BulkString(data) => {
                write_line(buf, prefix::BULK_STRING, data.len().to_string().as_bytes());
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespValue::Null => write_line(buf, prefix::BULK_STRING, b"-1"),
            RespValue::Array(values) => {
                write_line(buf, prefix::ARRAY, values.len().to_string().as_bytes());
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Returns the payload of a bulk string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::BulkString(b) => Some(b),
            _ => None,
        }
    }
}

#[inline]
fn write_line(buf: &mut Vec<u8>, prefix: u8, body: &[u8]) {
    buf.push(prefix);
    buf.extend_from_slice(body);
    buf.extend_from_slice(CRLF);
}

/// Writes a simple string or error line. CR and LF in `text` become spaces,
/// since either would end the frame early.
fn write_status_line(buf: &mut Vec<u8>, prefix: u8, text: &str) {
    buf.push(prefix);
    buf.extend(
        text.bytes()
            .map(|b| if b == b'\r' || b == b'\n' { b' ' } else { b }),
    );
    buf.extend_from_slice(CRLF);
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::SimpleString(s) => write!(f, "{}", s),
            RespValue::Error(s) => write!(f, "(error) {}", s),
            RespValue::Integer(n) => write!(f, "(integer) {}", n),
            RespValue::BulkString(data) => write!(f, "\"{}\"", String::from_utf8_lossy(data)),
            RespValue::Null => write!(f, "(nil)"),
            RespValue::Array(values) if values.is_empty() => write!(f, "(empty array)"),
            RespValue::Array(values) => {
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) {}", i + 1, v)?;
                }
                Ok(())
            }
        }
    }
}
