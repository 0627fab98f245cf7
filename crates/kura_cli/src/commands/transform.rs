//! Transform command implementation

use std::path::PathBuf;

use kura_cache::{CacheDirectory, CacheManager, CacheOptions, CacheStatus, TransformedOutput};
use miette::{IntoDiagnostic, Result};
use rayon::prelude::*;
use tracing::{error, info};

use super::{command_transformer, load_config, storage_mode};
use crate::cli::{CacheArgs, TransformArgs};
use crate::transformer::CommandError;

pub fn cache_options(args: &CacheArgs) -> CacheOptions {
    let cache_directory = if args.no_cache {
        CacheDirectory::Disabled
    } else {
        match &args.cache_dir {
            Some(dir) => CacheDirectory::Explicit(dir.clone()),
            None => CacheDirectory::Standard,
        }
    };

    CacheOptions {
        cache_directory,
        cache_identifier: args.identifier.clone(),
        compression: !args.no_compression,
        read_only: args.read_only,
        storage: storage_mode(args.legacy),
        ..CacheOptions::default()
    }
}

/// Transforms every file and prints the outputs in argument order.
///
/// Returns `true` if any file failed to transform.
pub fn run_transform(args: &TransformArgs) -> Result<bool> {
    let config = load_config(&args.config)?;
    let mut dependencies = vec![args.config.clone()];
    dependencies.extend(args.depends_on.iter().cloned());
    let transformer = command_transformer(&args.command)?.with_dependencies(dependencies);
    let manager = CacheManager::new(&cache_options(&args.cache));

    let results: Vec<(PathBuf, Result<(TransformedOutput, CacheStatus), FileError>)> = args
        .files
        .par_iter()
        .map(|file| {
            let result = std::fs::read_to_string(file)
                .map_err(FileError::Read)
                .and_then(|source| {
                    let mut config = config.clone();
                    config.filename = Some(file.display().to_string());
                    manager
                        .resolve_with_status(&source, &config, &transformer)
                        .map_err(FileError::Transform)
                });
            (file.clone(), result)
        })
        .collect();

    let mut has_errors = false;
    for (file, result) in results {
        match result {
            Ok((output, status)) => {
                info!("{} ({})", file.display(), status_label(status));
                print!("{}", output.code);
            }
            Err(e) => {
                error!("{}: {}", file.display(), e);
                has_errors = true;
            }
        }
    }

    let stats = manager.stats();
    info!(
        "{} hits, {} misses, {} uncached",
        stats.hits, stats.misses, stats.bypassed
    );
    std::io::Write::flush(&mut std::io::stdout()).into_diagnostic()?;
    Ok(has_errors)
}

fn status_label(status: CacheStatus) -> &'static str {
    match status {
        CacheStatus::Hit => "hit",
        CacheStatus::Miss => "miss",
        CacheStatus::Bypassed => "uncached",
    }
}

#[derive(Debug, thiserror::Error)]
enum FileError {
    #[error("Failed to read file: {0}")]
    Read(std::io::Error),

    #[error(transparent)]
    Transform(CommandError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cache_dir: Option<&str>, no_cache: bool) -> CacheArgs {
        CacheArgs {
            cache_dir: cache_dir.map(PathBuf::from),
            no_cache,
            identifier: None,
            no_compression: false,
            read_only: false,
            legacy: false,
        }
    }

    #[test]
    fn test_cache_options_default_directory() {
        let options = cache_options(&args(None, false));
        assert_eq!(options.cache_directory, CacheDirectory::Standard);
        assert!(options.compression);
    }

    #[test]
    fn test_cache_options_explicit_directory() {
        let options = cache_options(&args(Some("/tmp/kura"), false));
        assert_eq!(
            options.cache_directory,
            CacheDirectory::Explicit(PathBuf::from("/tmp/kura"))
        );
    }

    #[test]
    fn test_cache_options_no_cache() {
        let options = cache_options(&args(None, true));
        assert_eq!(options.cache_directory, CacheDirectory::Disabled);
    }

    #[test]
    fn test_cache_options_flags() {
        let mut cache = args(None, false);
        cache.identifier = Some("ci".to_string());
        cache.no_compression = true;
        cache.read_only = true;
        cache.legacy = true;

        let options = cache_options(&cache);
        assert_eq!(options.cache_identifier.as_deref(), Some("ci"));
        assert!(!options.compression);
        assert!(options.read_only);
        assert_eq!(options.storage, kura_cache::StorageMode::Legacy);
    }
}
