//! The Shared Keyspace
//!
//! All connection tasks, the snapshot loader and the expiry sweeper share one
//! [`Keyspace`] behind an `Arc`. It is the only mutable shared state in the
//! server.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │                 Keyspace                  │
//! │   Mutex<HashMap<Bytes, Entry>>            │
//! │   KeyspaceConfig (read-only)              │
//! └───────────────────────────────────────────┘
//!      ▲            ▲              ▲
//!  connection    connection    ExpirySweeper
//!    task          task         (tokio task)
//! ```
//!
//! One mutex guards the whole map. Every operation takes it exactly once and
//! never across an `.await`, so all operations on a key are linearizable.
//!
//! ## Expiry
//!
//! An entry whose deadline is at or before "now" is never returned. `get`
//! removes it in the same critical section (lazy expiry); `keys` skips it
//! without removing it; [`Keyspace::cleanup_expired`] removes all of them
//! (active expiry, driven by the sweeper).

use crate::storage::glob::GlobPattern;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A stored value with optional absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub value: Bytes,
    /// `None` = never expires
    pub expires_at: Option<Instant>,
}

impl Entry {
    pub fn new(value: Bytes, expires_at: Option<Instant>) -> Self {
        Self { value, expires_at }
    }

    /// Checks whether the entry is dead at `now`.
    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

/// Read-only server settings reported by `CONFIG GET`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyspaceConfig {
    /// Directory holding the snapshot file
    pub dir: String,
    /// Snapshot file name inside `dir`
    pub dbfilename: String,
}

impl Default for KeyspaceConfig {
    fn default() -> Self {
        Self {
            dir: ".".to_string(),
            dbfilename: "dump.rdb".to_string(),
        }
    }
}

/// The in-memory key-value store.
///
/// # Example
///
/// ```
/// use cinderkv::storage::Keyspace;
/// use bytes::Bytes;
/// use std::time::Duration;
///
/// let keyspace = Keyspace::new();
/// keyspace.set(Bytes::from("foo"), Bytes::from("bar"), None);
/// assert_eq!(keyspace.get(b"foo"), Some(Bytes::from("bar")));
///
/// keyspace.set(Bytes::from("session"), Bytes::from("abc"), Some(Duration::from_secs(60)));
/// assert_eq!(keyspace.keys("*").len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct Keyspace {
    data: Mutex<HashMap<Bytes, Entry>>,
    config: KeyspaceConfig,
    /// Entries removed by lazy or active expiry since startup
    expired_count: AtomicU64,
}

impl Keyspace {
    /// Creates an empty keyspace with default config.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: KeyspaceConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &KeyspaceConfig {
        &self.config
    }

    /// Inserts or replaces `key`. The previous value and expiry are discarded.
    pub fn set(&self, key: Bytes, value: Bytes, ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.set_with_deadline(key, value, expires_at);
    }

    /// Inserts or replaces `key` with an absolute deadline.
    ///
    /// A deadline in the past is stored as is; the entry is then invisible
    /// and removed by the next `get` or sweep.
    pub fn set_with_deadline(&self, key: Bytes, value: Bytes, expires_at: Option<Instant>) {
        self.data.lock().insert(key, Entry::new(value, expires_at));
    }

    /// Returns the live value for `key`.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.get_at(key, Instant::now())
    }

    fn get_at(&self, key: &[u8], now: Instant) -> Option<Bytes> {
        let mut data = self.data.lock();
        match data.get(key) {
            Some(entry) if entry.is_expired_at(now) => {}
            Some(entry) => return Some(entry.value.clone()),
            None => return None,
        }

        data.remove(key);
        self.expired_count.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Returns every live key matching `pattern`, sorted byte-wise.
    ///
    /// Scans the whole map under the lock.
    pub fn keys(&self, pattern: impl AsRef<[u8]>) -> Vec<Bytes> {
        self.keys_at(&GlobPattern::new(pattern), Instant::now())
    }

    fn keys_at(&self, pattern: &GlobPattern, now: Instant) -> Vec<Bytes> {
        let match_all = pattern.matches_all();
        let mut keys: Vec<Bytes> = {
            let data = self.data.lock();
            data.iter()
                .filter(|(key, entry)| {
                    !entry.is_expired_at(now) && (match_all || pattern.matches(key))
                })
                .map(|(key, _)| key.clone())
                .collect()
        };
        keys.sort_unstable();
        keys
    }

    /// Removes every expired entry. Returns how many were removed.
    pub fn cleanup_expired(&self) -> u64 {
        self.cleanup_expired_at(Instant::now())
    }

    fn cleanup_expired_at(&self, now: Instant) -> u64 {
        let removed = {
            let mut data = self.data.lock();
            let before = data.len();
            data.retain(|_, entry| !entry.is_expired_at(now));
            (before - data.len()) as u64
        };

        if removed > 0 {
            self.expired_count.fetch_add(removed, Ordering::Relaxed);
        }
        removed
    }

    /// Looks up a read-only configuration parameter (`dir` or `dbfilename`).
    pub fn config_get(&self, name: &str) -> Option<&str> {
        if name.eq_ignore_ascii_case("dir") {
            Some(&self.config.dir)
        } else if name.eq_ignore_ascii_case("dbfilename") {
            Some(&self.config.dbfilename)
        } else {
            None
        }
    }

    /// Number of stored entries, including expired ones not yet removed.
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total entries removed by expiry since startup.
    pub fn expired_count(&self) -> u64 {
        self.expired_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn key(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    #[test]
    fn test_set_and_get() {
        let keyspace = Keyspace::new();
        keyspace.set(key("foo"), key("bar"), None);
        assert_eq!(keyspace.get(b"foo"), Some(key("bar")));
        assert_eq!(keyspace.len(), 1);
    }

    #[test]
    fn test_get_missing_is_idempotent() {
        let keyspace = Keyspace::new();
        for _ in 0..3 {
            assert_eq!(keyspace.get(b"never-set"), None);
        }
        assert_eq!(keyspace.expired_count(), 0);
    }

    #[test]
    fn test_expiry_boundary() {
        let keyspace = Keyspace::new();
        let deadline = Instant::now() + Duration::from_millis(100);
        keyspace.set_with_deadline(key("foo"), key("bar"), Some(deadline));

        assert_eq!(
            keyspace.get_at(b"foo", deadline - Duration::from_millis(1)),
            Some(key("bar"))
        );
        assert_eq!(keyspace.get_at(b"foo", deadline), None);
        // Removed by the lazy branch, and stays absent
        assert_eq!(keyspace.len(), 0);
        assert_eq!(keyspace.get_at(b"foo", deadline - Duration::from_millis(1)), None);
        assert_eq!(keyspace.expired_count(), 1);
    }

    #[test]
    fn test_expiry_with_real_clock() {
        let keyspace = Keyspace::new();
        keyspace.set(key("foo"), key("bar"), Some(Duration::from_millis(50)));
        assert_eq!(keyspace.get(b"foo"), Some(key("bar")));

        thread::sleep(Duration::from_millis(80));
        assert_eq!(keyspace.get(b"foo"), None);
        assert_eq!(keyspace.get(b"foo"), None);
    }

    #[test]
    fn test_overwrite_replaces_ttl() {
        let keyspace = Keyspace::new();
        let now = Instant::now();

        keyspace.set_with_deadline(key("k"), key("v1"), Some(now + Duration::from_millis(10)));
        keyspace.set_with_deadline(key("k"), key("v2"), Some(now + Duration::from_secs(60)));
        assert_eq!(
            keyspace.get_at(b"k", now + Duration::from_millis(20)),
            Some(key("v2"))
        );

        keyspace.set_with_deadline(key("k"), key("v3"), None);
        assert_eq!(
            keyspace.get_at(b"k", now + Duration::from_secs(3600)),
            Some(key("v3"))
        );
    }

    #[test]
    fn test_set_without_ttl_clears_previous_ttl() {
        let keyspace = Keyspace::new();
        keyspace.set(key("k"), key("v1"), Some(Duration::from_millis(10)));
        keyspace.set(key("k"), key("v2"), None);

        thread::sleep(Duration::from_millis(30));
        assert_eq!(keyspace.get(b"k"), Some(key("v2")));
    }

    #[test]
    fn test_past_deadline_is_stored_but_invisible() {
        let keyspace = Keyspace::new();
        keyspace.set_with_deadline(key("old"), key("v"), Some(Instant::now()));

        assert_eq!(keyspace.len(), 1);
        assert!(keyspace.keys("*").is_empty());
        assert_eq!(keyspace.get(b"old"), None);
        assert_eq!(keyspace.len(), 0);
    }

    #[test]
    fn test_keys_pattern() {
        let keyspace = Keyspace::new();
        for k in ["abc", "ac", "abbc", "hello", "hallo"] {
            keyspace.set(key(k), key("v"), None);
        }

        assert_eq!(keyspace.keys("a?c"), vec![key("abc")]);
        assert_eq!(keyspace.keys("h[ae]llo"), vec![key("hallo"), key("hello")]);
        assert_eq!(
            keyspace.keys("*"),
            vec![key("abbc"), key("abc"), key("ac"), key("hallo"), key("hello")]
        );
        assert!(keyspace.keys("zzz*").is_empty());
    }

    #[test]
    fn test_keys_skips_expired_without_removing() {
        let keyspace = Keyspace::new();
        let now = Instant::now();
        keyspace.set_with_deadline(key("live"), key("v"), None);
        keyspace.set_with_deadline(key("dead"), key("v"), Some(now + Duration::from_millis(5)));

        let later = now + Duration::from_millis(10);
        assert_eq!(keyspace.keys_at(&GlobPattern::new("*"), later), vec![key("live")]);
        assert_eq!(keyspace.len(), 2);
    }

    #[test]
    fn test_cleanup_expired() {
        let keyspace = Keyspace::new();
        let now = Instant::now();
        keyspace.set_with_deadline(key("k1"), key("v"), Some(now + Duration::from_millis(10)));
        keyspace.set_with_deadline(key("k2"), key("v"), Some(now + Duration::from_millis(10)));
        keyspace.set_with_deadline(key("k3"), key("v"), None);

        assert_eq!(keyspace.cleanup_expired_at(now), 0);
        assert_eq!(keyspace.cleanup_expired_at(now + Duration::from_millis(10)), 2);
        assert_eq!(keyspace.len(), 1);
        assert_eq!(keyspace.get(b"k3"), Some(key("v")));
        assert_eq!(keyspace.expired_count(), 2);
    }

    #[test]
    fn test_config_get() {
        let keyspace = Keyspace::with_config(KeyspaceConfig {
            dir: "/tmp".to_string(),
            dbfilename: "dump.rdb".to_string(),
        });

        assert_eq!(keyspace.config_get("dir"), Some("/tmp"));
        assert_eq!(keyspace.config_get("DBFILENAME"), Some("dump.rdb"));
        assert_eq!(keyspace.config_get("maxmemory"), None);
    }

    #[test]
    fn test_concurrent_access() {
        let keyspace = Arc::new(Keyspace::new());
        let mut handles = vec![];

        for i in 0..10 {
            let keyspace = Arc::clone(&keyspace);
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    let k = format!("key-{}-{}", i, j);
                    keyspace.set(Bytes::from(k.clone()), Bytes::from("value"), None);
                    assert!(keyspace.get(k.as_bytes()).is_some());
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(keyspace.len(), 1000);
        assert_eq!(keyspace.keys("key-3-*").len(), 100);
    }

    #[test]
    fn test_concurrent_lazy_expiry_never_resurrects() {
        let keyspace = Arc::new(Keyspace::new());
        keyspace.set_with_deadline(key("k"), key("v"), Some(Instant::now()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let keyspace = Arc::clone(&keyspace);
                thread::spawn(move || keyspace.get(b"k"))
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), None);
        }
        assert_eq!(keyspace.expired_count(), 1);
    }
}
