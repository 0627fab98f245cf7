//! Subcommand implementations

pub mod key;
pub mod stats;
pub mod transform;

use std::path::Path;

use kura_cache::{StorageMode, TransformConfig};
use miette::{IntoDiagnostic, Result, WrapErr};

use crate::transformer::CommandTransformer;

pub(crate) fn storage_mode(legacy: bool) -> StorageMode {
    if legacy {
        StorageMode::Legacy
    } else {
        StorageMode::Database
    }
}

pub(crate) fn load_config(path: &Path) -> Result<TransformConfig> {
    TransformConfig::from_file(path)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to load config {}", path.display()))
}

pub(crate) fn command_transformer(command: &[String]) -> Result<CommandTransformer> {
    CommandTransformer::new(command).ok_or_else(|| miette::miette!("No transform command given"))
}
