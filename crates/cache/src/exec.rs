//! Cached artifact execution
//!
//! Runs a cached binary with arguments and environment. True executables
//! spawn directly; Windows script binaries (`.bat`/`.cmd`/`.ps1`) cannot
//! be spawned as processes and go through a command-shell wrapper, with
//! the cache entry directory prepended to `PATH` so the script can locate
//! siblings shipped alongside it.

use dlx_core::{Error, Result};
use std::path::Path;
use std::process::ExitStatus;
use tokio::process::Command;
use tracing::debug;

/// Extensions that require a command-shell wrapper on Windows.
const SHELL_WRAPPED_EXTENSIONS: &[&str] = &["bat", "cmd", "ps1"];

/// Whether the artifact is a script-type binary that needs a command-shell
/// wrapper rather than a direct spawn.
#[must_use]
pub fn needs_shell_wrapper(artifact: &Path) -> bool {
    artifact
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SHELL_WRAPPED_EXTENSIONS
                .iter()
                .any(|candidate| ext.eq_ignore_ascii_case(candidate))
        })
}

/// Run a cached artifact and wait for it to exit.
///
/// `entry_dir` is the artifact's cache entry directory; it is prepended to
/// `PATH` only for shell-wrapped script binaries.
///
/// # Errors
///
/// Returns an error if the process cannot be spawned.
pub async fn run_artifact(
    entry_dir: &Path,
    artifact: &Path,
    args: &[String],
    envs: &[(String, String)],
) -> Result<ExitStatus> {
    let mut command = base_command(entry_dir, artifact)?;
    command.args(args);
    for (name, value) in envs {
        command.env(name, value);
    }

    debug!(artifact = %artifact.display(), ?args, "Running artifact");
    command
        .status()
        .await
        .map_err(|e| Error::io(e, artifact, "spawn"))
}

#[cfg(windows)]
fn base_command(entry_dir: &Path, artifact: &Path) -> Result<Command> {
    if !needs_shell_wrapper(artifact) {
        return Ok(Command::new(artifact));
    }

    let is_powershell = artifact
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("ps1"));

    let mut command = if is_powershell {
        let mut c = Command::new("powershell");
        c.arg("-NoProfile")
            .arg("-ExecutionPolicy")
            .arg("Bypass")
            .arg("-File")
            .arg(artifact);
        c
    } else {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(artifact);
        c
    };
    command.env("PATH", path_with_entry_dir(entry_dir)?);
    Ok(command)
}

#[cfg(not(windows))]
fn base_command(_entry_dir: &Path, artifact: &Path) -> Result<Command> {
    Ok(Command::new(artifact))
}

/// Prepend the entry directory to the current `PATH`.
#[cfg(windows)]
fn path_with_entry_dir(entry_dir: &Path) -> Result<std::ffi::OsString> {
    let current = std::env::var_os("PATH").unwrap_or_default();
    let mut paths = vec![entry_dir.to_path_buf()];
    paths.extend(std::env::split_paths(&current));
    std::env::join_paths(paths)
        .map_err(|e| Error::configuration(format!("Cannot extend PATH: {e}")))
}
