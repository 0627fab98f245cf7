//! External dependency tracking.
//!
//! A transform may read files besides its source (an inherited
//! configuration file, for example). Those files cannot be part of the key,
//! because they are only known after the transform has run once, so their
//! fingerprints are stored inside the entry and re-checked on every hit.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::CacheError;

/// A file consulted by a transform together with its content fingerprint.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
pub struct ExternalDependency {
    /// Path as reported by the transform.
    pub path: String,

    /// BLAKE3 hash of the file content at record time.
    pub fingerprint: String,
}

/// Records and re-validates external dependencies.
pub struct DependencyTracker;

impl DependencyTracker {
    /// Computes the BLAKE3 hash of a file's content.
    pub fn fingerprint(path: &Path) -> Result<String, CacheError> {
        let content = std::fs::read(path).map_err(|e| CacheError::io(path, e))?;
        Ok(blake3::hash(&content).to_hex().to_string())
    }

    /// Fingerprints each path at its current content.
    ///
    /// Fails if any file cannot be read; such a result cannot be cached
    /// safely because it could never be validated.
    pub fn record(paths: &[PathBuf]) -> Result<Vec<ExternalDependency>, CacheError> {
        let mut deps: Vec<ExternalDependency> = Vec::with_capacity(paths.len());
        for path in paths {
            let recorded = path.to_string_lossy().into_owned();
            if deps.iter().any(|dep| dep.path == recorded) {
                continue;
            }
            deps.push(ExternalDependency {
                fingerprint: Self::fingerprint(path)?,
                path: recorded,
            });
        }
        Ok(deps)
    }

    /// Returns true if every dependency still has its recorded content.
    ///
    /// A missing or unreadable file makes the set invalid.
    pub fn revalidate(deps: &[ExternalDependency]) -> bool {
        deps.iter().all(|dep| {
            match Self::fingerprint(Path::new(&dep.path)) {
                Ok(current) if current == dep.fingerprint => true,
                Ok(_) => {
                    debug!("External dependency changed: {}", dep.path);
                    false
                }
                Err(e) => {
                    debug!("External dependency unavailable: {}", e);
                    false
                }
            }
        })
    }
}
