//! dlx CLI application
//!
//! Downloads binary artifacts on demand, caches them under a per-user
//! cache directory, and executes them - the "download and execute"
//! pattern, safe across concurrent invocations.

// CLI binary intentionally writes to stdout/stderr
#![allow(clippy::print_stdout, clippy::print_stderr)]

mod cli;
mod commands;

use miette::Report;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = cli::parse();
    match commands::execute(cli).await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:?}", Report::new(err));
            std::process::exit(1);
        }
    }
}
