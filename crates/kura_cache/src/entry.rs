//! Cache entry types.

use serde::{Deserialize, Serialize};

use crate::deps::ExternalDependency;

/// Version of the entry layout. Entries written under another version are
/// treated as misses.
pub const SCHEMA_VERSION: u32 = 1;

/// Output of one transform invocation.
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
pub struct TransformedOutput {
    /// Transformed code.
    pub code: String,

    /// Source map, if one was produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map: Option<String>,

    /// Transform-specific metadata (opaque to the cache).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

impl TransformedOutput {
    /// Creates an output with code only.
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            map: None,
            metadata: None,
        }
    }

    /// Sets the source map.
    pub fn with_map(mut self, map: impl Into<String>) -> Self {
        self.map = Some(map.into());
        self
    }

    /// Sets the metadata.
    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }
}

/// A cache entry for a single fingerprint.
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
pub struct CacheEntry {
    /// Layout version this entry was written with.
    pub schema_version: u32,

    /// Cached transform output.
    pub output: TransformedOutput,

    /// External dependencies consulted by the transform.
    #[serde(default)]
    pub dependencies: Vec<ExternalDependency>,

    /// Timestamp when this entry was created (seconds since the Unix epoch).
    pub created_at: u64,
}

impl CacheEntry {
    /// Creates a new cache entry stamped with the current schema version and time.
    pub fn new(output: TransformedOutput, dependencies: Vec<ExternalDependency>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            output,
            dependencies,
            created_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        }
    }

    /// Returns true if this entry was written with the current layout.
    pub fn is_current(&self) -> bool {
        self.schema_version == SCHEMA_VERSION
    }
}
