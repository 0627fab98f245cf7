//! Kura CLI
//!
//! Inspect a persistent compilation cache and drive transforms through it.

mod cli;
mod commands;
mod transformer;

use std::process::ExitCode;

use clap::Parser;
use miette::Result;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(has_errors) => {
            if has_errors {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            error!("{:?}", e);
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<bool> {
    match cli.command {
        Commands::Stats { cache_dir, legacy } => {
            commands::stats::run_stats(cache_dir, legacy)?;
            Ok(false)
        }
        Commands::Key {
            file,
            config,
            identifier,
            command,
        } => {
            commands::key::run_key(&file, &config, identifier, &command)?;
            Ok(false)
        }
        Commands::Transform(args) => commands::transform::run_transform(&args),
    }
}
