//! Byte-level RDB reader.
//!
//! The reader owns the whole file as a [`Bytes`] and walks it with the
//! [`Buf`] cursor. Every multi-byte read is preceded by a bounds check so a
//! short file turns into [`SnapshotError::Truncated`] instead of a panic.
//!
//! ```text
//! "REDIS" 4*digit
//! { 0xFA aux-key aux-value
//! | 0xFE db-index
//! | 0xFB table-size expires-size
//! | [0xFD u32le | 0xFC u64le] [0x00] key value
//! } 0xFF [checksum]
//! ```

use bytes::{Buf, Bytes};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, trace};

/// Magic bytes at the start of every snapshot, followed by a 4-digit version.
pub const MAGIC: &[u8] = b"REDIS";

/// Header length: magic plus version digits.
pub const HEADER_LEN: usize = 9;

pub mod opcode {
    /// Value type of a plain string record
    pub const STRING: u8 = 0x00;
    pub const AUX: u8 = 0xFA;
    pub const RESIZE_DB: u8 = 0xFB;
    pub const EXPIRE_TIME_MS: u8 = 0xFC;
    pub const EXPIRE_TIME: u8 = 0xFD;
    pub const SELECT_DB: u8 = 0xFE;
    pub const EOF: u8 = 0xFF;
}

/// Errors raised while decoding a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing or invalid RDB header")]
    BadHeader,

    #[error("unsupported length encoding {byte:#04x} at offset {offset}")]
    UnsupportedLength { byte: u8, offset: usize },

    #[error("unknown opcode {opcode:#04x} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },

    #[error("snapshot truncated at offset {offset}")]
    Truncated { offset: usize },
}

pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Absolute expiry attached to a record, as a Unix timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotExpiry {
    Seconds(u32),
    Millis(u64),
}

impl SnapshotExpiry {
    pub fn unix_millis(&self) -> u64 {
        match *self {
            SnapshotExpiry::Seconds(s) => u64::from(s) * 1000,
            SnapshotExpiry::Millis(ms) => ms,
        }
    }

    /// Maps the wall-clock expiry onto the monotonic clock, given the value of
    /// both clocks at load time. Expiries already in the past map to an
    /// instant at or before `now`.
    ///
    /// Returns `None` if the expiry lies too far in the future to represent.
    pub fn deadline(&self, now: Instant, wall_now: SystemTime) -> Option<Instant> {
        let at = UNIX_EPOCH.checked_add(Duration::from_millis(self.unix_millis()))?;
        match at.duration_since(wall_now) {
            Ok(remaining) => now.checked_add(remaining),
            Err(past) => Some(now.checked_sub(past.duration()).unwrap_or(now)),
        }
    }
}

/// One key/value pair decoded from the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub key: Bytes,
    pub value: Bytes,
    pub expiry: Option<SnapshotExpiry>,
}

/// Cursor over an in-memory snapshot.
#[derive(Debug)]
pub struct RdbReader {
    buf: Bytes,
    total: usize,
    finished: bool,
}

impl RdbReader {
    pub fn new(data: impl Into<Bytes>) -> Self {
        let buf = data.into();
        Self {
            total: buf.len(),
            buf,
            finished: false,
        }
    }

    /// Current position from the start of the file.
    pub fn offset(&self) -> usize {
        self.total - self.buf.remaining()
    }

    fn ensure(&self, n: usize) -> SnapshotResult<()> {
        if self.buf.remaining() < n {
            Err(SnapshotError::Truncated {
                offset: self.offset(),
            })
        } else {
            Ok(())
        }
    }

    /// Validates `REDIS` + 4 ASCII digits and returns the version number.
    pub fn read_header(&mut self) -> SnapshotResult<u32> {
        if self.buf.remaining() < HEADER_LEN || !self.buf.starts_with(MAGIC) {
            return Err(SnapshotError::BadHeader);
        }

        let digits = &self.buf[MAGIC.len()..HEADER_LEN];
        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(SnapshotError::BadHeader);
        }
        let version = digits
            .iter()
            .fold(0u32, |acc, d| acc * 10 + u32::from(d - b'0'));

        self.buf.advance(HEADER_LEN);
        Ok(version)
    }

    /// Returns the next key/value record, skipping metadata opcodes.
    ///
    /// `Ok(None)` at the EOF opcode or when the file ends between records.
    pub fn next_record(&mut self) -> SnapshotResult<Option<SnapshotRecord>> {
        while !self.finished {
            if !self.buf.has_remaining() {
                debug!("Snapshot ended without an EOF opcode");
                self.finished = true;
                break;
            }

            let offset = self.offset();
            match self.buf.get_u8() {
                opcode::SELECT_DB => {
                    let db = self.read_length()?;
                    trace!(db, "Snapshot database selector");
                }
                opcode::RESIZE_DB => {
                    let table_size = self.read_length()?;
                    let expires_size = self.read_length()?;
                    trace!(table_size, expires_size, "Snapshot resize hint");
                }
                opcode::AUX => {
                    let key = self.read_string()?;
                    let value = self.read_string()?;
                    debug!(
                        key = %String::from_utf8_lossy(&key),
                        value = %String::from_utf8_lossy(&value),
                        "Snapshot aux field"
                    );
                }
                opcode::EXPIRE_TIME => {
                    self.ensure(4)?;
                    let secs = self.buf.get_u32_le();
                    return self.read_expiring_record(SnapshotExpiry::Seconds(secs)).map(Some);
                }
                opcode::EXPIRE_TIME_MS => {
                    self.ensure(8)?;
                    let ms = self.buf.get_u64_le();
                    return self.read_expiring_record(SnapshotExpiry::Millis(ms)).map(Some);
                }
                opcode::STRING => return self.read_key_value(None).map(Some),
                opcode::EOF => {
                    // The trailing checksum, if any, is left unread
                    self.finished = true;
                }
                other => {
                    return Err(SnapshotError::UnknownOpcode {
                        opcode: other,
                        offset,
                    })
                }
            }
        }
        Ok(None)
    }

    /// Reads the record after an expiry. Files written by Redis carry a
    /// string value-type byte (`0x00`) before the key; without it the key
    /// length follows the timestamp directly.
    fn read_expiring_record(&mut self, expiry: SnapshotExpiry) -> SnapshotResult<SnapshotRecord> {
        self.ensure(1)?;
        if self.buf[0] == opcode::STRING {
            self.buf.advance(1);
        }
        self.read_key_value(Some(expiry))
    }

    fn read_key_value(&mut self, expiry: Option<SnapshotExpiry>) -> SnapshotResult<SnapshotRecord> {
        let key = self.read_string()?;
        let value = self.read_string()?;
        Ok(SnapshotRecord { key, value, expiry })
    }

    /// Decodes a length: the top two bits of the first byte pick 6-bit,
    /// 14-bit or 32-bit big-endian. `11` is reserved for string encodings.
    pub fn read_length(&mut self) -> SnapshotResult<u64> {
        self.ensure(1)?;
        let offset = self.offset();
        let first = self.buf.get_u8();

        match first >> 6 {
            0b00 => Ok(u64::from(first & 0x3F)),
            0b01 => {
                self.ensure(1)?;
                let low = self.buf.get_u8();
                Ok((u64::from(first & 0x3F) << 8) | u64::from(low))
            }
            0b10 => {
                self.ensure(4)?;
                Ok(u64::from(self.buf.get_u32()))
            }
            _ => Err(SnapshotError::UnsupportedLength {
                byte: first,
                offset,
            }),
        }
    }

    /// Decodes a length-prefixed string, or an integer-encoded string
    /// (`0xC0` i8, `0xC1` i16le, `0xC2` i32le) rendered as decimal text.
    pub fn read_string(&mut self) -> SnapshotResult<Bytes> {
        self.ensure(1)?;
        let offset = self.offset();
        let first = self.buf[0];

        if first >> 6 == 0b11 {
            self.buf.advance(1);
            let n: i64 = match first & 0x3F {
                0 => {
                    self.ensure(1)?;
                    i64::from(self.buf.get_i8())
                }
                1 => {
                    self.ensure(2)?;
                    i64::from(self.buf.get_i16_le())
                }
                2 => {
                    self.ensure(4)?;
                    i64::from(self.buf.get_i32_le())
                }
                _ => return Err(SnapshotError::UnsupportedLength { byte: first, offset }),
            };
            return Ok(Bytes::from(n.to_string()));
        }

        let len = self.read_length()?;
        if len > self.buf.remaining() as u64 {
            return Err(SnapshotError::Truncated { offset });
        }
        Ok(self.buf.copy_to_bytes(len as usize))
    }
}
