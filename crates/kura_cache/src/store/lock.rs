//! Store-wide advisory write lock.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs4::FileExt;
use tracing::debug;

use crate::CacheError;

/// Name of the lock file inside a store directory.
pub const LOCK_FILE: &str = "kura.lock";

const MAX_BACKOFF: Duration = Duration::from_millis(50);

/// An exclusive lock on a store directory, released on drop.
///
/// Only writers take it; readers never do. Coordination happens through
/// the file system so separate processes see the same lock.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Acquires the lock for `dir`, waiting at most `timeout`.
    ///
    /// The directory must already exist.
    pub fn acquire(dir: &Path, timeout: Duration) -> Result<Self, CacheError> {
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| CacheError::io(&path, e))?;

        let deadline = Instant::now() + timeout;
        let mut backoff = Duration::from_millis(1);
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { file, path }),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(CacheError::io(&path, e)),
            }

            let now = Instant::now();
            if now >= deadline {
                debug!("Gave up waiting for {}", path.display());
                return Err(CacheError::LockTimeout { path, timeout });
            }
            std::thread::sleep(backoff.min(deadline - now));
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    /// Returns the lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!("Failed to release {}: {}", self.path.display(), e);
        }
    }
}
