//! RDB Snapshot Loader
//!
//! Seeds the [`Keyspace`] from a snapshot before the server accepts
//! connections. Loading is best effort: records decoded before a format
//! error stay in the keyspace, and the caller decides how to report the
//! error. A missing file is not an error.
//!
//! ```no_run
//! use cinderkv::snapshot;
//! use cinderkv::storage::Keyspace;
//!
//! let keyspace = Keyspace::new();
//! match snapshot::bootstrap(&keyspace, "/var/lib/cinderkv", "dump.rdb") {
//!     Ok(summary) => println!("loaded {} keys", summary.keys_loaded),
//!     Err(e) => eprintln!("snapshot not loaded: {}", e),
//! }
//! ```

pub mod reader;

pub use reader::{RdbReader, SnapshotError, SnapshotExpiry, SnapshotRecord, SnapshotResult};

use crate::storage::Keyspace;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::Path;
use std::time::{Instant, SystemTime};
use tracing::{debug, info};

/// What a successful load put into the keyspace.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
    /// RDB version from the header; `None` when no file was read
    pub version: Option<u32>,
    pub keys_loaded: usize,
    /// Keys loaded with an expiry (including ones already expired)
    pub keys_with_expiry: usize,
}

/// Loads `dir/dbfilename` into `keyspace`.
///
/// An empty `dbfilename` means no snapshot is configured.
pub fn bootstrap(
    keyspace: &Keyspace,
    dir: impl AsRef<Path>,
    dbfilename: &str,
) -> SnapshotResult<LoadSummary> {
    if dbfilename.is_empty() {
        debug!("No snapshot file configured");
        return Ok(LoadSummary::default());
    }

    let path = dir.as_ref().join(dbfilename);
    let summary = load(keyspace, &path)?;
    if summary.version.is_some() {
        info!(
            path = %path.display(),
            keys = summary.keys_loaded,
            with_expiry = summary.keys_with_expiry,
            "Snapshot loaded"
        );
    }
    Ok(summary)
}

/// Loads the snapshot at `path` into `keyspace`.
pub fn load(keyspace: &Keyspace, path: impl AsRef<Path>) -> SnapshotResult<LoadSummary> {
    let path = path.as_ref();
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "No snapshot file, starting with an empty keyspace");
            return Ok(LoadSummary::default());
        }
        Err(e) => return Err(e.into()),
    };

    debug!(path = %path.display(), bytes = data.len(), "Read snapshot file");
    load_bytes(keyspace, data)
}

/// Decodes an in-memory snapshot into `keyspace`.
pub fn load_bytes(keyspace: &Keyspace, data: impl Into<Bytes>) -> SnapshotResult<LoadSummary> {
    let mut reader = RdbReader::new(data);
    let version = reader.read_header()?;

    let mut summary = LoadSummary {
        version: Some(version),
        ..LoadSummary::default()
    };

    // Both clocks are sampled once so every expiry shares the same reference point
    let now = Instant::now();
    let wall_now = SystemTime::now();

    while let Some(record) = reader.next_record()? {
        let deadline = match record.expiry {
            Some(expiry) => {
                summary.keys_with_expiry += 1;
                let deadline = expiry.deadline(now, wall_now);
                if deadline.is_none() {
                    debug!(
                        key = %String::from_utf8_lossy(&record.key),
                        unix_ms = expiry.unix_millis(),
                        "Snapshot expiry out of range, loading key without expiry"
                    );
                }
                deadline
            }
            None => None,
        };
        keyspace.set_with_deadline(record.key, record.value, deadline);
        summary.keys_loaded += 1;
    }

    Ok(summary)
}
