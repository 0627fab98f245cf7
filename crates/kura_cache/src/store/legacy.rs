//! File-per-key store.
//!
//! Each entry lives at `<dir>/<key hex>`. New blobs are written to a
//! temporary file in the same directory and renamed into place.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use super::lock::StoreLock;
use super::{CacheStore, StoreStats};
use crate::key::CacheKey;
use crate::CacheError;

/// Store keeping one file per key.
pub struct LegacyStore {
    dir: PathBuf,
    lock_timeout: Duration,
    read_only: bool,
}

impl LegacyStore {
    /// Creates a writable store; the directory is created on the first write.
    pub fn new(dir: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            lock_timeout,
            read_only: false,
        }
    }

    /// Opens an existing store directory read-only.
    pub fn open_read_only(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(CacheError::StoreNotFound { path: dir });
        }
        Ok(Self {
            dir,
            lock_timeout: Duration::ZERO,
            read_only: true,
        })
    }

    /// Returns the file path for `key`.
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.to_hex())
    }

    fn write_atomically(&self, key: &CacheKey, blob: &[u8]) -> Result<(), CacheError> {
        let path = self.entry_path(key);
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", key.to_hex(), std::process::id()));

        let written = fs::File::create(&tmp).and_then(|mut file| {
            file.write_all(blob)?;
            file.sync_all()
        });
        if let Err(e) = written.and_then(|_| fs::rename(&tmp, &path)) {
            let _ = fs::remove_file(&tmp);
            return Err(CacheError::io(path, e));
        }
        Ok(())
    }
}

impl CacheStore for LegacyStore {
    fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let path = self.entry_path(key);
        match fs::read(&path) {
            Ok(blob) => Some(blob),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                debug!("Cache read failed for {}: {}", path.display(), e);
                None
            }
        }
    }

    fn put(&self, key: &CacheKey, blob: &[u8]) -> Result<(), CacheError> {
        if self.read_only {
            return Err(CacheError::ReadOnly {
                path: self.dir.clone(),
            });
        }

        fs::create_dir_all(&self.dir).map_err(|e| CacheError::io(&self.dir, e))?;
        let _lock = StoreLock::acquire(&self.dir, self.lock_timeout)?;
        self.write_atomically(key, blob)
    }

    fn stats(&self) -> Result<StoreStats, CacheError> {
        let mut stats = StoreStats::default();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(stats),
            Err(e) => return Err(CacheError::io(&self.dir, e)),
        };

        for entry in entries {
            let entry = entry.map_err(|e| CacheError::io(&self.dir, e))?;
            let is_key = entry
                .file_name()
                .to_str()
                .is_some_and(|name| CacheKey::from_hex(name).is_some());
            if !is_key {
                continue;
            }
            let metadata = entry.metadata().map_err(|e| CacheError::io(entry.path(), e))?;
            if metadata.is_file() {
                stats.entry_count += 1;
                stats.total_bytes += metadata.len();
            }
        }
        Ok(stats)
    }

    fn dir(&self) -> &Path {
        &self.dir
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}
