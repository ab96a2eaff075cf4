//! Command execution

use crate::cli::{Cli, Command};
use dlx_cache::{
    AcquireOptions, ArtifactCacheStore, DownloadCoordinator, DownloadSpec, HttpTransport, exec,
};
use dlx_core::{Result, paths};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Exit code reported when an acquisition is canceled (128 + SIGINT).
pub const EXIT_CANCELED: i32 = 130;

/// Execute the parsed CLI invocation, returning the process exit code.
///
/// # Errors
///
/// Propagates acquisition, cache, and spawn failures for `main` to render.
pub async fn execute(cli: Cli) -> Result<i32> {
    let store = build_store(cli.cache_dir, cli.ttl_ms)?;

    match cli.command {
        Command::Run {
            url,
            name,
            checksum,
            force,
            args,
        } => {
            let spec = build_spec(url, name, checksum);
            let coordinator = build_coordinator(store);
            let options = AcquireOptions::new()
                .with_force(force)
                .with_cancel(ctrl_c_token());

            let Some(acquired) = coordinator.acquire(&spec, &options).await? else {
                return Ok(EXIT_CANCELED);
            };

            let key = dlx_cache::compute_cache_key(&spec.url, &spec.name);
            let entry_dir = coordinator.store().entry_dir(&key);
            let status = exec::run_artifact(&entry_dir, &acquired.path, &args, &[]).await?;
            Ok(status.code().unwrap_or(EXIT_CANCELED))
        }
        Command::Fetch {
            url,
            name,
            checksum,
            force,
        } => {
            let spec = build_spec(url, name, checksum);
            let coordinator = build_coordinator(store);
            let options = AcquireOptions::new()
                .with_force(force)
                .with_cancel(ctrl_c_token());

            let Some(acquired) = coordinator.acquire(&spec, &options).await? else {
                return Ok(EXIT_CANCELED);
            };
            println!("{}", acquired.path.display());
            Ok(0)
        }
        Command::List => {
            for entry in store.entries()? {
                match entry.metadata {
                    Some(meta) => println!(
                        "{}  {}  {} bytes  {}",
                        entry.key, meta.checksum_algorithm, meta.size, meta.checksum
                    ),
                    None => println!("{}  (missing or corrupt metadata)", entry.key),
                }
            }
            Ok(0)
        }
        Command::Clean { max_age_ms } => {
            let store = match max_age_ms {
                Some(ms) => store.with_ttl(Duration::from_millis(ms)),
                None => store,
            };
            let stats = store.cleanup()?;
            info!(
                removed = stats.removed,
                kept = stats.kept,
                failed = stats.failed,
                "Cache cleanup finished"
            );
            println!(
                "removed {} entries, kept {}, skipped {} failures",
                stats.removed, stats.kept, stats.failed
            );
            Ok(0)
        }
        Command::Invalidate { url, name } => {
            let key = dlx_cache::compute_cache_key(&url, &name);
            store.invalidate(&key)?;
            println!("invalidated {key}");
            Ok(0)
        }
    }
}

fn build_store(cache_dir: Option<PathBuf>, ttl_ms: Option<u64>) -> Result<ArtifactCacheStore> {
    let root = match cache_dir {
        Some(dir) => dir,
        None => paths::cache_root()?,
    };
    debug!(root = %root.display(), "Using cache root");
    let store = ArtifactCacheStore::new(root);
    Ok(match ttl_ms {
        Some(ms) => store.with_ttl(Duration::from_millis(ms)),
        None => store,
    })
}

fn build_spec(url: String, name: String, checksum: Option<String>) -> DownloadSpec {
    let mut spec = DownloadSpec::new(url, name);
    spec.checksum = checksum;
    spec
}

fn build_coordinator(store: ArtifactCacheStore) -> DownloadCoordinator {
    DownloadCoordinator::new(store, Arc::new(HttpTransport::new()))
}

/// A token canceled on Ctrl-C, so an in-flight acquisition resolves to
/// "no result" instead of leaving a half-finished entry locked.
fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let canceler = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceler.cancel();
        }
    });
    token
}
