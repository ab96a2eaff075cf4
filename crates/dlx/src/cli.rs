//! Command-line interface definition

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Download, cache, and execute binary artifacts.
#[derive(Debug, Parser)]
#[command(name = "dlx", version, about)]
pub struct Cli {
    /// Cache directory (defaults to the per-user cache)
    #[arg(long, global = true, env = "DLX_CACHE_DIR", value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Entry time-to-live in milliseconds (default: 7 days)
    #[arg(long, global = true, value_name = "MS")]
    pub ttl_ms: Option<u64>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// dlx subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Acquire an artifact and run it, forwarding its exit code
    Run {
        /// URL to download the artifact from
        url: String,
        /// Logical artifact name
        name: String,
        /// Expected SHA-256 checksum of the downloaded bytes
        #[arg(long)]
        checksum: Option<String>,
        /// Re-download even if a valid cache entry exists
        #[arg(long)]
        force: bool,
        /// Arguments forwarded to the artifact
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Acquire an artifact and print its cached path
    Fetch {
        /// URL to download the artifact from
        url: String,
        /// Logical artifact name
        name: String,
        /// Expected SHA-256 checksum of the downloaded bytes
        #[arg(long)]
        checksum: Option<String>,
        /// Re-download even if a valid cache entry exists
        #[arg(long)]
        force: bool,
    },
    /// List cache entries
    List,
    /// Remove expired and corrupt cache entries
    Clean {
        /// Override the age threshold in milliseconds
        #[arg(long, value_name = "MS")]
        max_age_ms: Option<u64>,
    },
    /// Remove the cache entry for one artifact
    Invalidate {
        /// URL the artifact was downloaded from
        url: String,
        /// Logical artifact name
        name: String,
    },
}

/// Parse the process arguments.
#[must_use]
pub fn parse() -> Cli {
    Cli::parse()
}
