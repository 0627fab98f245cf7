//! # kura_cache
//!
//! Persistent compilation cache for source-to-source transforms.
//!
//! A transform that turns a source file plus a configuration into output
//! code is expensive. This crate memoizes it across process runs:
//!
//! 1. **Fingerprint**: the source, the normalized configuration, a cache
//!    identifier and (for environment-sensitive configs) the environment
//!    are hashed into a [`CacheKey`]
//! 2. **Lookup**: the key is looked up in a [`CacheStore`]; a hit is only
//!    trusted after its recorded [`ExternalDependency`] files revalidate
//! 3. **Write-back**: on a miss the transform runs and the result is
//!    encoded by [`EntryCodec`] and stored
//!
//! Every failure inside the cache degrades to "run the transform". The only
//! error a caller ever sees from [`CacheManager::resolve`] is the
//! transformer's own.
//!
//! ## Storage
//!
//! Entries live in an embedded SQLite database (the default) or, in legacy
//! mode, in one file per key. Both layouts are safe for many readers and
//! writers across threads and processes.
//!
//! ## Example
//!
//! ```rust,ignore
//! use kura_cache::{CacheManager, CacheOptions, TransformConfig};
//!
//! let manager = CacheManager::new(&CacheOptions::standard());
//! let config = TransformConfig::from_file(".kurarc.json")?;
//! let output = manager.resolve(&source, &config, &my_transformer)?;
//! println!("{}", output.code);
//! ```

mod codec;
mod config;
mod deps;
mod entry;
mod error;
mod key;
mod manager;
pub mod store;
mod transform;

pub use codec::EntryCodec;
pub use config::{
    CacheDirectory, CacheOptions, DEFAULT_ENV_NAME, ENV_NAME_VAR, NODE_ENV_VAR, NormalizedConfig,
    PluginRef, StorageMode, TransformConfig, resolve_env_name, standard_cache_dir,
};
pub use deps::{DependencyTracker, ExternalDependency};
pub use entry::{CacheEntry, SCHEMA_VERSION, TransformedOutput};
pub use error::CacheError;
pub use key::{CacheKey, Fingerprinter, KEY_LEN};
pub use manager::{CacheManager, CacheStatus, ResolveStats};
pub use store::{CacheStore, StoreStats};
pub use transform::{FnTransformer, TransformOutput, Transformer, TransformerIdentity};
