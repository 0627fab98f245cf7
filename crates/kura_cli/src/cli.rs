//! CLI argument definitions

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Kura - persistent compilation cache for source transforms
#[derive(Parser)]
#[command(name = "kura")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show statistics for an existing cache store
    Stats {
        /// Cache directory (defaults to the standard location)
        #[arg(long, value_name = "DIR")]
        cache_dir: Option<PathBuf>,

        /// Use the file-per-key layout
        #[arg(long)]
        legacy: bool,
    },

    /// Print the cache key for a file
    Key {
        /// Source file
        file: PathBuf,

        /// Transform configuration file (JSON)
        #[arg(short, long, value_name = "CONFIG")]
        config: PathBuf,

        /// Cache identifier replacing the computed default
        #[arg(long, value_name = "ID")]
        identifier: Option<String>,

        /// Transform command whose identity feeds the default identifier
        #[arg(last = true, value_name = "COMMAND")]
        command: Vec<String>,
    },

    /// Transform files through a command, using the cache
    Transform(TransformArgs),
}

#[derive(Args)]
pub struct TransformArgs {
    /// Source files
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Transform configuration file (JSON)
    #[arg(short, long, value_name = "CONFIG")]
    pub config: PathBuf,

    #[command(flatten)]
    pub cache: CacheArgs,

    /// Extra file the output depends on (repeatable)
    #[arg(long, value_name = "PATH")]
    pub depends_on: Vec<PathBuf>,

    /// Command that reads source on stdin and writes output on stdout
    #[arg(last = true, required = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

#[derive(Args)]
pub struct CacheArgs {
    /// Cache directory (defaults to the standard location)
    #[arg(long, value_name = "DIR", conflicts_with = "no_cache")]
    pub cache_dir: Option<PathBuf>,

    /// Disable caching
    #[arg(long)]
    pub no_cache: bool,

    /// Cache identifier replacing the computed default
    #[arg(long, value_name = "ID")]
    pub identifier: Option<String>,

    /// Store entries uncompressed
    #[arg(long)]
    pub no_compression: bool,

    /// Never write to the cache
    #[arg(long)]
    pub read_only: bool,

    /// Use the file-per-key layout
    #[arg(long)]
    pub legacy: bool,
}
