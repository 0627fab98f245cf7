//! Cache error types.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur inside the cache layer.
///
/// None of these ever reach the build result: the manager absorbs them and
/// falls back to running the transform. They exist so the individual
/// components can report precisely what went wrong.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The transform configuration contains a value without a stable identity.
    #[error("Configuration is not hashable: {0}")]
    ConfigNotHashable(String),

    /// A read-only store was requested for a location that holds no store.
    #[error("Cache store not found at {}", path.display())]
    StoreNotFound {
        /// The directory that was expected to contain the store.
        path: PathBuf,
    },

    /// The store-wide write lock could not be acquired in time.
    #[error("Timed out after {timeout:?} waiting for cache lock {}", path.display())]
    LockTimeout {
        /// Path of the lock file.
        path: PathBuf,
        /// How long the writer waited.
        timeout: Duration,
    },

    /// A write was attempted against a store opened read-only.
    #[error("Cache store at {} is read-only", path.display())]
    ReadOnly {
        /// The store directory.
        path: PathBuf,
    },

    /// File system I/O error.
    #[error("Cache I/O error at {}: {source}", path.display())]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Embedded database error.
    #[error("Cache database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored blob could not be decoded as a valid entry.
    #[error("Corrupt cache entry: {0}")]
    CorruptEntry(String),

    /// An entry could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CacheError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigNotHashable(message.into())
    }

    /// Creates a corrupt entry error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::CorruptEntry(message.into())
    }

    /// Creates an I/O error bound to a path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true if this error means the backing store could not be used.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(
            self,
            Self::StoreNotFound { .. }
                | Self::LockTimeout { .. }
                | Self::ReadOnly { .. }
                | Self::Io { .. }
                | Self::Database(_)
        )
    }
}
