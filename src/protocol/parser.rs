//! Incremental RESP Parser
//!
//! The parser never owns the input. It looks at the bytes the connection has
//! buffered so far and answers one of three things:
//!
//! - `Ok(Some((value, consumed)))` - a complete frame was decoded from the
//!   first `consumed` bytes; the caller advances its buffer by that much
//! - `Ok(None)` - the frame is not complete yet; keep the bytes and read more
//! - `Err(ParseError)` - the bytes can never become a valid frame
//!
//! Client requests are always arrays of bulk strings (`*<n>\r\n` followed by
//! `n` times `$<len>\r\n<bytes>\r\n`), decoded by [`RespParser::parse_command`].
//! [`RespParser::parse`] decodes any RESP2 value and is what a client uses to
//! read replies.

use crate::protocol::command::Command;
use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur during RESP parsing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// A frame started with a byte other than the one the grammar requires.
    #[error("expected '{expected}', got {found:?}")]
    UnexpectedByte { expected: char, found: char },

    /// Unknown type prefix byte in a general value.
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    #[error("invalid bulk length: {0}")]
    InvalidBulkLength(i64),

    #[error("invalid multibulk length: {0}")]
    InvalidArrayLength(i64),

    /// Any other framing violation (missing CRLF, nesting too deep, ...).
    #[error("{0}")]
    Protocol(String),

    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of elements in a request array
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Maximum array nesting depth when decoding general values
pub const MAX_NESTING_DEPTH: usize = 32;

/// Longest header line (`*<n>`, `$<len>`, simple values) accepted before its CRLF
pub const MAX_HEADER_LINE: usize = 64 * 1024;

/// A RESP parser with a configurable bulk string limit.
///
/// ```
/// use cinderkv::protocol::RespParser;
///
/// let parser = RespParser::new();
/// let buf = b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n";
/// let (command, consumed) = parser.parse_command(buf).unwrap().unwrap();
/// assert_eq!(command.name_upper(), "GET");
/// assert_eq!(consumed, buf.len());
/// ```
#[derive(Debug, Clone)]
pub struct RespParser {
    max_bulk_size: usize,
}

impl Default for RespParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RespParser {
    pub fn new() -> Self {
        Self {
            max_bulk_size: MAX_BULK_SIZE,
        }
    }

    /// Creates a parser that rejects bulk strings longer than `max_bulk_size`.
    pub fn with_max_bulk_size(max_bulk_size: usize) -> Self {
        Self { max_bulk_size }
    }

    /// Attempts to decode one client request from the front of `buf`.
    pub fn parse_command(&self, buf: &[u8]) -> ParseResult<Option<(Command, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }
        expect_prefix(buf[0], prefix::ARRAY)?;

        let (count, mut consumed) = match read_length_line(buf)? {
            Some(line) => line,
            None => return Ok(None),
        };
        if count < 1 || count as u64 > MAX_ARRAY_LEN as u64 {
            return Err(ParseError::InvalidArrayLength(count));
        }
        let count = count as usize;

        let mut parts = Vec::with_capacity(count.min(16));
        for _ in 0..count {
            match self.parse_bulk_part(&buf[consumed..])? {
                Some((data, used)) => {
                    parts.push(data);
                    consumed += used;
                }
                None => return Ok(None),
            }
        }

        let mut parts = parts.into_iter();
        let name = parts.next().unwrap_or_default();
        Ok(Some((Command::new(name, parts.collect()), consumed)))
    }

    /// Attempts to decode any RESP value from the front of `buf`.
    pub fn parse(&self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        self.parse_value(buf, 0)
    }

    fn parse_value(&self, buf: &[u8], depth: usize) -> ParseResult<Option<(RespValue, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }
        if depth > MAX_NESTING_DEPTH {
            return Err(ParseError::Protocol(format!(
                "maximum nesting depth exceeded: {}",
                MAX_NESTING_DEPTH
            )));
        }

        match buf[0] {
            prefix::SIMPLE_STRING => Ok(read_text_line(buf)?
                .map(|(s, used)| (RespValue::SimpleString(s), used))),
            prefix::ERROR => {
                Ok(read_text_line(buf)?.map(|(s, used)| (RespValue::Error(s), used)))
            }
            prefix::INTEGER => {
                Ok(read_length_line(buf)?.map(|(n, used)| (RespValue::Integer(n), used)))
            }
            prefix::BULK_STRING => {
                // `$-1` is only meaningful in replies, so handle it before parse_bulk_part
                match read_length_line(buf)? {
                    Some((-1, used)) => Ok(Some((RespValue::Null, used))),
                    Some(_) => Ok(self
                        .parse_bulk_part(buf)?
                        .map(|(data, used)| (RespValue::BulkString(data), used))),
                    None => Ok(None),
                }
            }
            prefix::ARRAY => self.parse_array(buf, depth),
            other => Err(ParseError::UnknownPrefix(other)),
        }
    }

    /// Parses an array: `*<count>\r\n<elements...>`
    fn parse_array(&self, buf: &[u8], depth: usize) -> ParseResult<Option<(RespValue, usize)>> {
        let (count, mut consumed) = match read_length_line(buf)? {
            Some(line) => line,
            None => return Ok(None),
        };
        if count == -1 {
            return Ok(Some((RespValue::Null, consumed)));
        }
        if count < 0 || count as u64 > MAX_ARRAY_LEN as u64 {
            return Err(ParseError::InvalidArrayLength(count));
        }

        let count = count as usize;
        let mut elements = Vec::with_capacity(count.min(16));
        for _ in 0..count {
            match self.parse_value(&buf[consumed..], depth + 1)? {
                Some((value, used)) => {
                    elements.push(value);
                    consumed += used;
                }
                None => return Ok(None),
            }
        }

        Ok(Some((RespValue::Array(elements), consumed)))
    }

    /// Parses `$<len>\r\n<data>\r\n` with a non-negative length.
    fn parse_bulk_part(&self, buf: &[u8]) -> ParseResult<Option<(Bytes, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }
        expect_prefix(buf[0], prefix::BULK_STRING)?;

        let (length, data_start) = match read_length_line(buf)? {
            Some(line) => line,
            None => return Ok(None),
        };
        if length < 0 {
            return Err(ParseError::InvalidBulkLength(length));
        }
        let length = length as u64;
        if length > self.max_bulk_size as u64 {
            return Err(ParseError::MessageTooLarge {
                size: length as usize,
                max: self.max_bulk_size,
            });
        }
        let length = length as usize;

        let total_needed = data_start + length + 2;
        if buf.len() < total_needed {
            return Ok(None);
        }
        if &buf[data_start + length..total_needed] != CRLF {
            return Err(ParseError::Protocol(
                "bulk string length does not match its payload".to_string(),
            ));
        }

        let data = Bytes::copy_from_slice(&buf[data_start..data_start + length]);
        Ok(Some((data, total_needed)))
    }
}

fn expect_prefix(found: u8, expected: u8) -> ParseResult<()> {
    if found == expected {
        Ok(())
    } else {
        Err(ParseError::UnexpectedByte {
            expected: expected as char,
            found: found as char,
        })
    }
}

/// Reads the header line after the prefix byte, returning its body and the
/// offset just past the CRLF.
///
/// A line with no CRLF within [`MAX_HEADER_LINE`] bytes is an error, so a
/// peer cannot grow an unterminated header without bound.
fn read_line(buf: &[u8]) -> ParseResult<Option<(&[u8], usize)>> {
    let body = &buf[1..];
    let window = &body[..body.len().min(MAX_HEADER_LINE + CRLF.len())];
    match find_crlf(window) {
        Some(pos) => Ok(Some((&body[..pos], 1 + pos + 2))),
        None if window.len() == MAX_HEADER_LINE + CRLF.len() => Err(ParseError::Protocol(
            match buf[0] {
                prefix::ARRAY => "too big mbulk count string",
                prefix::BULK_STRING => "too big bulk count string",
                _ => "too big inline request",
            }
            .to_string(),
        )),
        None => Ok(None),
    }
}

fn read_text_line(buf: &[u8]) -> ParseResult<Option<(String, usize)>> {
    match read_line(buf)? {
        Some((body, used)) => {
            let s = std::str::from_utf8(body).map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
            Ok(Some((s.to_string(), used)))
        }
        None => Ok(None),
    }
}

fn read_length_line(buf: &[u8]) -> ParseResult<Option<(i64, usize)>> {
    match read_line(buf)? {
        Some((body, used)) => Ok(Some((parse_i64(body)?, used))),
        None => Ok(None),
    }
}

fn parse_i64(body: &[u8]) -> ParseResult<i64> {
    let s = std::str::from_utf8(body).map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
    s.parse()
        .map_err(|_| ParseError::InvalidInteger(s.escape_default().to_string()))
}

/// Finds the position of the first `\r\n` in `buf`.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Decodes a single RESP value with a default parser.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    RespParser::new().parse(buf)
}

/// Decodes a single client request with a default parser.
pub fn parse_command(buf: &[u8]) -> ParseResult<Option<(Command, usize)>> {
    RespParser::new().parse_command(buf)
}
