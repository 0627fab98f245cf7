//! Cache and transform configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::CacheError;

/// Environment variable consulted first when resolving the environment name.
pub const ENV_NAME_VAR: &str = "KURA_ENV";

/// Fallback environment variable for the environment name.
pub const NODE_ENV_VAR: &str = "NODE_ENV";

/// Environment name used when nothing else is configured.
pub const DEFAULT_ENV_NAME: &str = "development";

const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

/// Where the cache lives, if anywhere.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "RawCacheDirectory")]
pub enum CacheDirectory {
    /// Caching is disabled; every call runs the transform.
    #[default]
    Disabled,
    /// The process-wide standard shared location (see [`standard_cache_dir`]).
    Standard,
    /// An explicit directory.
    Explicit(PathBuf),
}

/// `cacheDirectory` accepts `false`, `true` or a path.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawCacheDirectory {
    Flag(bool),
    Path(PathBuf),
}

impl From<RawCacheDirectory> for CacheDirectory {
    fn from(raw: RawCacheDirectory) -> Self {
        match raw {
            RawCacheDirectory::Flag(false) => CacheDirectory::Disabled,
            RawCacheDirectory::Flag(true) => CacheDirectory::Standard,
            RawCacheDirectory::Path(path) => CacheDirectory::Explicit(path),
        }
    }
}

impl CacheDirectory {
    /// Resolves this setting to a concrete directory.
    ///
    /// Returns `None` when caching is disabled.
    pub fn resolve(&self) -> Option<PathBuf> {
        match self {
            CacheDirectory::Disabled => None,
            CacheDirectory::Standard => Some(standard_cache_dir()),
            CacheDirectory::Explicit(path) => Some(path.clone()),
        }
    }
}

/// Returns the standard shared cache location.
///
/// This is `<platform cache dir>/kura/transforms` (for example
/// `~/.cache/kura/transforms` on Linux), or `<temp dir>/kura-cache` on
/// platforms without a per-user cache directory.
pub fn standard_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("kura").join("transforms"))
        .unwrap_or_else(|| std::env::temp_dir().join("kura-cache"))
}

/// On-disk layout of a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// One embedded database per directory.
    #[default]
    Database,
    /// One file per key, named by the key's hex encoding.
    Legacy,
}

/// Options controlling the cache, as supplied by the build pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheOptions {
    /// Cache location, or disabled.
    pub cache_directory: CacheDirectory,

    /// Overrides the computed identity component of every key.
    pub cache_identifier: Option<String>,

    /// Whether stored blobs are compressed.
    #[serde(rename = "cacheCompression")]
    pub compression: bool,

    /// Open the store without provisioning it and reject writes.
    pub read_only: bool,

    /// Storage layout.
    pub storage: StorageMode,

    /// Upper bound on waiting for the store-wide write lock, in milliseconds.
    pub lock_timeout_ms: u64,

    /// Environment name; resolved from the process environment when absent.
    pub env_name: Option<String>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            cache_directory: CacheDirectory::Disabled,
            cache_identifier: None,
            compression: true,
            read_only: false,
            storage: StorageMode::Database,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            env_name: None,
        }
    }
}

impl CacheOptions {
    /// Creates options caching into an explicit directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_directory: CacheDirectory::Explicit(dir.into()),
            ..Self::default()
        }
    }

    /// Creates options with caching disabled.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Creates options using the standard shared location.
    pub fn standard() -> Self {
        Self {
            cache_directory: CacheDirectory::Standard,
            ..Self::default()
        }
    }

    /// Sets the cache identifier override.
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.cache_identifier = Some(identifier.into());
        self
    }

    /// Enables or disables compression.
    pub fn with_compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }

    /// Sets read-only mode.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Sets the storage layout.
    pub fn with_storage(mut self, storage: StorageMode) -> Self {
        self.storage = storage;
        self
    }

    /// Sets the write-lock timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the environment name.
    pub fn with_env_name(mut self, env_name: impl Into<String>) -> Self {
        self.env_name = Some(env_name.into());
        self
    }

    /// Returns the write-lock timeout.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Parses options from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Resolves the environment name.
///
/// Order: the explicit value, `KURA_ENV`, `NODE_ENV`, then `"development"`.
/// Empty values are ignored.
pub fn resolve_env_name(explicit: Option<&str>) -> String {
    explicit
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .or_else(|| non_empty_var(ENV_NAME_VAR))
        .or_else(|| non_empty_var(NODE_ENV_VAR))
        .unwrap_or_else(|| DEFAULT_ENV_NAME.to_string())
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

/// A plugin or preset reference in a transform configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginRef {
    /// Declared plugin name. A plugin without one cannot be fingerprinted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Declared plugin version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Plugin options.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub options: Value,
}

impl PluginRef {
    /// Creates a named, versioned plugin reference.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            version: Some(version.into()),
            options: Value::Null,
        }
    }

    /// Creates a plugin reference with no declared identity.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Sets the plugin options.
    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }

    /// Returns the stable identity token (`name@version`, or `name`).
    pub fn identity(&self) -> Result<String, CacheError> {
        let name = self
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| CacheError::config("plugin has no declared name"))?;

        Ok(match self.version.as_deref().map(str::trim) {
            Some(version) if !version.is_empty() => format!("{name}@{version}"),
            _ => name.to_string(),
        })
    }
}

/// Transform configuration for one invocation.
///
/// This is an explicit, finite description of everything that influences
/// the transform besides the source text. Opaque executable values are
/// represented by their [`PluginRef`] identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransformConfig {
    /// Name of the file being transformed.
    pub filename: Option<String>,

    /// Presets, in application order.
    pub presets: Vec<PluginRef>,

    /// Plugins, in application order.
    pub plugins: Vec<PluginRef>,

    /// Transform-wide options.
    pub options: Map<String, Value>,

    /// Whether a source map is produced.
    pub source_maps: bool,

    /// Whether output depends on the active environment.
    pub env_sensitive: bool,

    /// Signature of the calling tool.
    pub caller: Option<String>,
}

impl TransformConfig {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| CacheError::io(path, e))?;
        serde_json::from_str(&content)
            .map_err(|e| CacheError::Serialization(format!("{}: {}", path.display(), e)))
    }

    /// Returns the identity tokens of all presets and plugins, sorted and deduplicated.
    pub fn plugin_identities(&self) -> Result<Vec<String>, CacheError> {
        let mut identities = self
            .presets
            .iter()
            .chain(&self.plugins)
            .map(PluginRef::identity)
            .collect::<Result<Vec<_>, _>>()?;
        identities.sort();
        identities.dedup();
        Ok(identities)
    }

    /// Normalizes the configuration into its canonical byte form.
    ///
    /// Object keys are sorted at every depth; plugin and preset lists keep
    /// their order since application order changes the output.
    pub fn normalize(&self) -> Result<NormalizedConfig, CacheError> {
        let presets = canonical_plugins(&self.presets)?;
        let plugins = canonical_plugins(&self.plugins)?;

        let document = serde_json::json!({
            "caller": self.caller,
            "envSensitive": self.env_sensitive,
            "filename": self.filename,
            "options": Value::Object(self.options.clone()),
            "plugins": plugins,
            "presets": presets,
            "sourceMaps": self.source_maps,
        });

        let mut out = String::new();
        write_canonical(&document, &mut out)?;
        Ok(NormalizedConfig {
            bytes: out.into_bytes(),
        })
    }
}

fn canonical_plugins(plugins: &[PluginRef]) -> Result<Value, CacheError> {
    plugins
        .iter()
        .map(|plugin| {
            Ok(serde_json::json!({
                "id": plugin.identity()?,
                "options": plugin.options,
            }))
        })
        .collect::<Result<Vec<_>, CacheError>>()
        .map(Value::Array)
}

fn write_canonical(value: &Value, out: &mut String) -> Result<(), CacheError> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(s, out)?,
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out)?;
                out.push(':');
                write_canonical(&map[key], out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

fn write_string(s: &str, out: &mut String) -> Result<(), CacheError> {
    let escaped = serde_json::to_string(s).map_err(|e| CacheError::Serialization(e.to_string()))?;
    out.push_str(&escaped);
    Ok(())
}

/// Canonical byte form of a [`TransformConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedConfig {
    bytes: Vec<u8>,
}

impl NormalizedConfig {
    /// Returns the canonical bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}
