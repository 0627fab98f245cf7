//! Stats command implementation

use std::path::PathBuf;

use kura_cache::{CacheError, standard_cache_dir, store::open_store_read_only};
use miette::{IntoDiagnostic, Result};

use super::storage_mode;

pub fn run_stats(cache_dir: Option<PathBuf>, legacy: bool) -> Result<()> {
    let dir = cache_dir.unwrap_or_else(standard_cache_dir);
    let store = match open_store_read_only(&dir, storage_mode(legacy)) {
        Ok(store) => store,
        Err(CacheError::StoreNotFound { path }) => {
            return Err(miette::miette!(
                "cache store not found at {}",
                path.display()
            ));
        }
        Err(e) => return Err(e).into_diagnostic(),
    };

    let stats = store.stats().into_diagnostic()?;
    println!("directory: {}", store.dir().display());
    println!("entries: {}", stats.entry_count);
    println!("bytes: {}", stats.total_bytes);
    Ok(())
}
