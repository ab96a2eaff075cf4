//! Cache-root resolution.
//!
//! The artifact cache lives under a per-user cache directory. Resolution
//! order (first writable wins):
//!
//! 1. `DLX_CACHE_DIR` (explicit override)
//! 2. `XDG_CACHE_HOME/dlx/artifacts`
//! 3. OS cache dir/dlx/artifacts
//! 4. `~/.dlx/cache/artifacts` (legacy)
//! 5. `TMPDIR/dlx/cache/artifacts` (fallback)

use crate::{Error, Result};
use dirs::{cache_dir, home_dir};
use std::path::PathBuf;

/// Environment variable overriding the cache root.
pub const CACHE_DIR_ENV: &str = "DLX_CACHE_DIR";

/// Inputs for determining the cache root directory
#[derive(Debug, Clone)]
pub struct CacheRootInputs {
    /// Explicit override from `DLX_CACHE_DIR`
    pub dlx_cache_dir: Option<PathBuf>,
    /// `XDG_CACHE_HOME`, if set
    pub xdg_cache_home: Option<PathBuf>,
    /// OS-reported cache directory
    pub os_cache_dir: Option<PathBuf>,
    /// Home directory
    pub home_dir: Option<PathBuf>,
    /// Temp directory fallback
    pub temp_dir: PathBuf,
}

impl CacheRootInputs {
    /// Capture the inputs from the current process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            dlx_cache_dir: std::env::var(CACHE_DIR_ENV)
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            xdg_cache_home: std::env::var("XDG_CACHE_HOME")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            os_cache_dir: cache_dir(),
            home_dir: home_dir(),
            temp_dir: std::env::temp_dir(),
        }
    }
}

/// Resolve the cache root from explicit inputs.
///
/// # Errors
///
/// Returns an error if no candidate directory is writable.
pub fn cache_root_from_inputs(inputs: CacheRootInputs) -> Result<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Some(dir) = inputs.dlx_cache_dir.filter(|p| !p.as_os_str().is_empty()) {
        candidates.push(dir);
    }
    if let Some(xdg) = inputs.xdg_cache_home {
        candidates.push(xdg.join("dlx/artifacts"));
    }
    if let Some(os_cache) = inputs.os_cache_dir {
        candidates.push(os_cache.join("dlx/artifacts"));
    }
    if let Some(home) = inputs.home_dir {
        candidates.push(home.join(".dlx/cache/artifacts"));
    }
    candidates.push(inputs.temp_dir.join("dlx/cache/artifacts"));

    for path in candidates {
        // If the path already exists, ensure it is writable; some CI
        // environments provide read-only cache directories under $HOME.
        if path.exists() {
            let probe = path.join(".write_probe");
            match std::fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&probe)
            {
                Ok(_) => {
                    let _ = std::fs::remove_file(&probe);
                    return Ok(path);
                }
                Err(_) => {
                    // Not writable, try next candidate
                    continue;
                }
            }
        }
        if std::fs::create_dir_all(&path).is_ok() {
            return Ok(path);
        }
        // Permission denied or other errors - try next candidate
    }
    Err(Error::configuration(
        "Failed to determine a writable cache directory",
    ))
}

/// Resolve the cache root from the process environment.
///
/// # Errors
///
/// Returns an error if no candidate directory is writable.
pub fn cache_root() -> Result<PathBuf> {
    cache_root_from_inputs(CacheRootInputs::from_env())
}
