//! Cache manager: lookup, transform on miss, write-back.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::codec::EntryCodec;
use crate::config::{CacheOptions, TransformConfig, resolve_env_name};
use crate::deps::DependencyTracker;
use crate::entry::{CacheEntry, TransformedOutput};
use crate::key::{CacheKey, Fingerprinter};
use crate::store::{CacheStore, open_store, open_store_read_only};
use crate::transform::{TransformOutput, Transformer};
use crate::CacheError;

/// How a call to [`CacheManager::resolve_with_status`] was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// A valid entry was found; the transformer was not invoked.
    Hit,
    /// No valid entry; the transformer ran and a write-back was attempted.
    Miss,
    /// The cache was not consulted (disabled, or the configuration is not hashable).
    Bypassed,
}

/// Cumulative counters for one manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveStats {
    /// Calls served from the cache.
    pub hits: u64,
    /// Calls that ran the transformer after a lookup.
    pub misses: u64,
    /// Calls that skipped the cache entirely.
    pub bypassed: u64,
    /// Write-backs that failed and were dropped.
    pub write_failures: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    bypassed: AtomicU64,
    write_failures: AtomicU64,
}

/// Orchestrates the persistent compilation cache.
///
/// A manager is cheap to share between worker threads: every call is an
/// independent transaction against the store. Failures inside the cache are
/// logged and absorbed; only the transformer's own error reaches the caller.
pub struct CacheManager {
    /// Backing store; `None` when caching is disabled or unavailable.
    store: Option<Box<dyn CacheStore>>,
    /// Entry codec.
    codec: EntryCodec,
    /// Explicit cache identifier, replacing the computed default.
    identifier: Option<String>,
    /// Environment name feeding the environment discriminator.
    env_name: String,
    counters: Counters,
}

impl CacheManager {
    /// Creates a manager from options.
    ///
    /// The cache directory and environment name are resolved here, once.
    /// A read-only store that does not exist leaves caching disabled.
    pub fn new(options: &CacheOptions) -> Self {
        let store = options.cache_directory.resolve().and_then(|dir| {
            if options.read_only {
                match open_store_read_only(&dir, options.storage) {
                    Ok(store) => Some(store),
                    Err(e) => {
                        debug!("Caching disabled: {}", e);
                        None
                    }
                }
            } else {
                Some(open_store(&dir, options.storage, options.lock_timeout()))
            }
        });

        Self::build(store, options)
    }

    /// Creates a manager over an existing store.
    pub fn with_store(store: Box<dyn CacheStore>, options: &CacheOptions) -> Self {
        Self::build(Some(store), options)
    }

    /// Creates a manager that never caches.
    pub fn disabled() -> Self {
        Self::build(None, &CacheOptions::disabled())
    }

    fn build(store: Option<Box<dyn CacheStore>>, options: &CacheOptions) -> Self {
        Self {
            store,
            codec: EntryCodec::new(options.compression),
            identifier: options.cache_identifier.clone(),
            env_name: resolve_env_name(options.env_name.as_deref()),
            counters: Counters::default(),
        }
    }

    /// Returns whether caching is enabled.
    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Returns the backing store, if any.
    pub fn store(&self) -> Option<&dyn CacheStore> {
        self.store.as_deref()
    }

    /// Returns the resolved environment name.
    pub fn env_name(&self) -> &str {
        &self.env_name
    }

    /// Returns the cumulative counters.
    pub fn stats(&self) -> ResolveStats {
        ResolveStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            bypassed: self.counters.bypassed.load(Ordering::Relaxed),
            write_failures: self.counters.write_failures.load(Ordering::Relaxed),
        }
    }

    /// Computes the key `resolve` would use for these inputs.
    pub fn cache_key<T: Transformer + ?Sized>(
        &self,
        source: &str,
        config: &TransformConfig,
        transformer: &T,
    ) -> Result<CacheKey, CacheError> {
        let identifier = match &self.identifier {
            Some(identifier) => identifier.clone(),
            None => Fingerprinter::default_identifier(&transformer.identity(), config)?,
        };
        let env = Fingerprinter::env_discriminator(config, &self.env_name);
        Fingerprinter::key_for(source.as_bytes(), config, &identifier, &env)
    }

    /// Returns the transformed output for `source`, from the cache when possible.
    pub fn resolve<T: Transformer + ?Sized>(
        &self,
        source: &str,
        config: &TransformConfig,
        transformer: &T,
    ) -> Result<TransformedOutput, T::Error> {
        self.resolve_with_status(source, config, transformer)
            .map(|(output, _)| output)
    }

    /// Like [`resolve`](Self::resolve), also reporting how the call was served.
    pub fn resolve_with_status<T: Transformer + ?Sized>(
        &self,
        source: &str,
        config: &TransformConfig,
        transformer: &T,
    ) -> Result<(TransformedOutput, CacheStatus), T::Error> {
        let Some(store) = self.store.as_deref() else {
            return self.bypass(source, config, transformer);
        };

        let key = match self.cache_key(source, config, transformer) {
            Ok(key) => key,
            Err(e) => {
                warn!("Not caching {}: {}", describe(config), e);
                return self.bypass(source, config, transformer);
            }
        };

        if let Some(output) = self.lookup(store, &key) {
            debug!("Cache hit for {} ({})", describe(config), key);
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok((output, CacheStatus::Hit));
        }

        debug!("Cache miss for {} ({})", describe(config), key);
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        let TransformOutput {
            output,
            dependencies,
        } = transformer.transform(source, config)?;

        if !store.is_read_only() {
            if let Err(e) = self.write_back(store, &key, &output, &dependencies) {
                warn!("Failed to write cache entry {}: {}", key, e);
                self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
            }
        }

        Ok((output, CacheStatus::Miss))
    }

    fn bypass<T: Transformer + ?Sized>(
        &self,
        source: &str,
        config: &TransformConfig,
        transformer: &T,
    ) -> Result<(TransformedOutput, CacheStatus), T::Error> {
        self.counters.bypassed.fetch_add(1, Ordering::Relaxed);
        let out = transformer.transform(source, config)?;
        Ok((out.output, CacheStatus::Bypassed))
    }

    /// Fetches and validates the entry for `key`.
    ///
    /// Undecodable entries and entries whose external dependencies changed
    /// are both treated as absent.
    fn lookup(&self, store: &dyn CacheStore, key: &CacheKey) -> Option<TransformedOutput> {
        let blob = store.get(key)?;
        let entry = match self.codec.decode(&blob) {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Discarding cache entry {}: {}", key, e);
                return None;
            }
        };

        if !DependencyTracker::revalidate(&entry.dependencies) {
            debug!("Cache entry {} is stale", key);
            return None;
        }

        Some(entry.output)
    }

    fn write_back(
        &self,
        store: &dyn CacheStore,
        key: &CacheKey,
        output: &TransformedOutput,
        dependencies: &[std::path::PathBuf],
    ) -> Result<(), CacheError> {
        let dependencies = DependencyTracker::record(dependencies)?;
        let entry = CacheEntry::new(output.clone(), dependencies);
        let blob = self.codec.encode(&entry)?;
        store.put(key, &blob)
    }
}

fn describe(config: &TransformConfig) -> &str {
    config.filename.as_deref().unwrap_or("<anonymous>")
}
