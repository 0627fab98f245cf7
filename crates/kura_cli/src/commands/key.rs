//! Key command implementation

use std::path::Path;

use kura_cache::{Fingerprinter, Transformer, TransformerIdentity, resolve_env_name};
use miette::{IntoDiagnostic, Result};

use super::{command_transformer, load_config};

pub fn run_key(
    file: &Path,
    config: &Path,
    identifier: Option<String>,
    command: &[String],
) -> Result<()> {
    let source = std::fs::read_to_string(file).into_diagnostic()?;
    let mut config = load_config(config)?;
    config.filename = Some(file.display().to_string());

    let identifier = match identifier {
        Some(identifier) => identifier,
        None => {
            let identity = if command.is_empty() {
                TransformerIdentity::new("kura", env!("CARGO_PKG_VERSION"))
            } else {
                command_transformer(command)?.identity()
            };
            Fingerprinter::default_identifier(&identity, &config).into_diagnostic()?
        }
    };
    let env = Fingerprinter::env_discriminator(&config, &resolve_env_name(None));
    let key = Fingerprinter::key_for(source.as_bytes(), &config, &identifier, &env)
        .into_diagnostic()?;

    println!("{key}");
    Ok(())
}
