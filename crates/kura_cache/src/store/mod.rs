//! Persistent key to blob stores.
//!
//! Two layouts implement [`CacheStore`]:
//!
//! - [`DatabaseStore`]: one embedded SQLite database per directory (default)
//! - [`LegacyStore`]: one file per key, named by the key's hex encoding
//!
//! Both follow the same discipline: readers take no lock, writers serialize
//! on a store-wide [`StoreLock`] with a bounded wait, and a write is visible
//! to readers either completely or not at all.

mod database;
mod legacy;
mod lock;

use std::path::Path;
use std::time::Duration;

pub use database::{DB_FILE, DatabaseStore};
pub use legacy::LegacyStore;
pub use lock::{LOCK_FILE, StoreLock};

use crate::config::StorageMode;
use crate::key::CacheKey;
use crate::CacheError;

/// Store statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of stored entries.
    pub entry_count: u64,
    /// Total size of stored blobs in bytes.
    pub total_bytes: u64,
}

/// A directory-backed, process-safe key to blob store.
pub trait CacheStore: Send + Sync {
    /// Returns the blob stored for `key`.
    ///
    /// Any failure (missing store, unreadable data, busy database) is
    /// reported as absence.
    fn get(&self, key: &CacheKey) -> Option<Vec<u8>>;

    /// Stores `blob` under `key`, replacing any previous blob atomically.
    ///
    /// Provisions the store directory on first use.
    fn put(&self, key: &CacheKey, blob: &[u8]) -> Result<(), CacheError>;

    /// Returns store statistics.
    fn stats(&self) -> Result<StoreStats, CacheError>;

    /// Returns the store directory.
    fn dir(&self) -> &Path;

    /// Returns true if writes are rejected.
    fn is_read_only(&self) -> bool;
}

/// Creates a writable store for `dir` without touching the file system.
pub fn open_store(dir: &Path, mode: StorageMode, lock_timeout: Duration) -> Box<dyn CacheStore> {
    match mode {
        StorageMode::Database => Box::new(DatabaseStore::new(dir, lock_timeout)),
        StorageMode::Legacy => Box::new(LegacyStore::new(dir, lock_timeout)),
    }
}

/// Opens an existing store read-only.
///
/// Fails with [`CacheError::StoreNotFound`] instead of creating anything.
pub fn open_store_read_only(
    dir: &Path,
    mode: StorageMode,
) -> Result<Box<dyn CacheStore>, CacheError> {
    Ok(match mode {
        StorageMode::Database => Box::new(DatabaseStore::open_read_only(dir)?),
        StorageMode::Legacy => Box::new(LegacyStore::open_read_only(dir)?),
    })
}
