//! Download coordination
//!
//! The coordinator owns the "acquire artifact" algorithm: check the cache,
//! serialize with other processes on the entry's lock, re-check inside the
//! lock, download through the retry-wrapped transport, verify the
//! checksum, persist metadata, and release the lock on every exit path.

use crate::hashing::compute_file_sha256;
use crate::metadata::ArtifactMetadata;
use crate::store::{ArtifactCacheStore, compute_cache_key};
use crate::transport::Transport;
use dlx_core::{DownloadSpec, Error, Result};
use dlx_lock::{CrossProcessLock, LockConfig};
use dlx_runner::{RetryDirective, RetryPolicy, retry};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Options for a single acquisition.
#[derive(Debug, Clone, Default)]
pub struct AcquireOptions {
    /// Bypass the cache validity check and re-download. The acquisition
    /// still serializes on the entry lock.
    pub force: bool,
    /// Cancellation token; a canceled acquisition resolves to `Ok(None)`.
    pub cancel: Option<CancellationToken>,
}

impl AcquireOptions {
    /// Create default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the force flag.
    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Watch a cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Result of a successful acquisition.
#[derive(Debug, Clone)]
pub struct AcquiredArtifact {
    /// Path of the cached artifact.
    pub path: PathBuf,
    /// SHA-256 checksum of the artifact bytes.
    pub checksum: String,
    /// Whether this call performed the download (`false` on a cache hit or
    /// when a concurrent process completed it first).
    pub downloaded: bool,
}

/// Orchestrates cache lookups and downloads for artifact specifications.
pub struct DownloadCoordinator {
    store: ArtifactCacheStore,
    transport: Arc<dyn Transport>,
    lock_config: LockConfig,
    retry_policy: RetryPolicy<Error>,
}

impl DownloadCoordinator {
    /// Create a coordinator over `store` using `transport` for downloads.
    #[must_use]
    pub fn new(store: ArtifactCacheStore, transport: Arc<dyn Transport>) -> Self {
        Self {
            store,
            transport,
            lock_config: LockConfig::default(),
            retry_policy: default_retry_policy(),
        }
    }

    /// Use a custom lock configuration.
    #[must_use]
    pub fn with_lock_config(mut self, config: LockConfig) -> Self {
        self.lock_config = config;
        self
    }

    /// Use a custom transport retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy<Error>) -> Self {
        self.retry_policy = policy;
        self
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &ArtifactCacheStore {
        &self.store
    }

    /// Acquire the artifact described by `spec`, downloading it if the
    /// cache has no valid entry.
    ///
    /// Returns `Ok(None)` when the acquisition was canceled.
    ///
    /// # Errors
    ///
    /// Surfaces permission/filesystem errors creating the cache, transport
    /// failures after retries are exhausted, checksum mismatches (the
    /// corrupt artifact is removed first), and lock failures.
    pub async fn acquire(
        &self,
        spec: &DownloadSpec,
        options: &AcquireOptions,
    ) -> Result<Option<AcquiredArtifact>> {
        let key = compute_cache_key(&spec.url, &spec.name);
        let artifact_path = self.store.artifact_path(&key, &spec.name);

        // Valid completed entries are immutable, so a hit needs no lock.
        if !options.force && artifact_path.exists() && self.store.is_valid(&key) {
            if let Some(meta) = self.store.read_metadata(&key) {
                debug!(%key, name = %spec.name, "Cache hit");
                return Ok(Some(AcquiredArtifact {
                    path: artifact_path,
                    checksum: meta.checksum,
                    downloaded: false,
                }));
            }
        }

        self.store.init()?;
        let entry_dir = self.store.entry_dir(&key);
        fs::create_dir_all(&entry_dir).map_err(|e| Error::io(e, &entry_dir, "create_dir_all"))?;

        // Serialize with other processes racing on this entry. The lock
        // file lives alongside the entry, so unrelated keys never block
        // each other.
        let lock =
            CrossProcessLock::new(self.store.lock_path(&key)).with_config(self.lock_config.clone());
        let guard = lock.acquire().await.map_err(Error::lock)?;

        let result = self.fetch_locked(spec, &key, &artifact_path, options).await;

        // Released on every exit path: the guard's drop also covers an
        // early return, but the happy path releases explicitly.
        guard.release();
        result
    }

    /// The download half of [`acquire`](Self::acquire), run while holding
    /// the entry lock.
    async fn fetch_locked(
        &self,
        spec: &DownloadSpec,
        key: &str,
        artifact_path: &Path,
        options: &AcquireOptions,
    ) -> Result<Option<AcquiredArtifact>> {
        // Another process may have completed the download while this one
        // waited for the lock; a complete file short-circuits the download.
        if !options.force && self.is_complete(key, artifact_path) {
            let checksum = compute_file_sha256(artifact_path).await?;
            debug!(%key, "Entry completed by a concurrent process");
            return Ok(Some(AcquiredArtifact {
                path: artifact_path.to_path_buf(),
                checksum,
                downloaded: false,
            }));
        }

        info!(url = %spec.url, name = %spec.name, "Downloading artifact");
        let transport = Arc::clone(&self.transport);
        let url = spec.url.clone();
        let dest = artifact_path.to_path_buf();
        let outcome = retry(&self.retry_policy, options.cancel.as_ref(), move || {
            let transport = Arc::clone(&transport);
            let url = url.clone();
            let dest = dest.clone();
            async move { transport.download(&url, &dest).await }
        })
        .await;

        match outcome {
            Ok(Some(())) => {}
            Ok(None) => {
                debug!(%key, "Acquisition canceled");
                discard_partial(artifact_path);
                return Ok(None);
            }
            Err(err) => {
                discard_partial(artifact_path);
                return Err(wrap_exhausted(err, &self.retry_policy));
            }
        }

        let actual = compute_file_sha256(artifact_path).await?;
        if let Some(expected) = &spec.checksum {
            if !expected.eq_ignore_ascii_case(&actual) {
                // Never leave a corrupt artifact behind
                discard_partial(artifact_path);
                return Err(Error::checksum_mismatch(artifact_path, expected, actual));
            }
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(artifact_path, fs::Permissions::from_mode(0o755))
                .map_err(|e| Error::io(e, artifact_path, "set_permissions"))?;
        }

        let size = fs::metadata(artifact_path)
            .map(|m| m.len())
            .map_err(|e| Error::io(e, artifact_path, "metadata"))?;

        // Non-critical side write: a failed metadata write only costs a
        // re-download on the next acquisition
        let meta = ArtifactMetadata::for_download(key, &spec.url, &actual, size);
        if let Err(e) = self.store.write_metadata(key, &meta) {
            warn!(%key, error = %e, "Failed to persist cache metadata");
        }

        info!(
            %key,
            name = %spec.name,
            checksum = %actual,
            size,
            "Artifact cached"
        );
        Ok(Some(AcquiredArtifact {
            path: artifact_path.to_path_buf(),
            checksum: actual,
            downloaded: true,
        }))
    }

    /// A complete entry has an artifact file whose size agrees with its
    /// parsed metadata.
    fn is_complete(&self, key: &str, artifact_path: &Path) -> bool {
        let Some(meta) = self.store.read_metadata(key) else {
            return false;
        };
        let Ok(size) = fs::metadata(artifact_path).map(|m| m.len()) else {
            return false;
        };
        size == meta.size && size > 0
    }
}

fn discard_partial(artifact_path: &Path) {
    if artifact_path.exists() {
        if let Err(e) = fs::remove_file(artifact_path) {
            warn!(path = %artifact_path.display(), error = %e, "Failed to remove partial artifact");
        }
    }
}

/// Default transport retry policy: a handful of attempts with jittered
/// exponential backoff, aborting immediately on errors retrying cannot fix.
#[must_use]
pub fn default_retry_policy() -> RetryPolicy<Error> {
    RetryPolicy::new()
        .with_retries(3)
        .with_base_delay(Duration::from_millis(500))
        .with_max_delay(Duration::from_secs(10))
        .with_jitter(true)
        .with_cancel_on_abort(true)
        .with_on_retry(|_, err: &Error, _| {
            if is_retryable(err) {
                Ok(RetryDirective::Continue)
            } else {
                Ok(RetryDirective::Abort)
            }
        })
}

/// Transient network and I/O failures are worth retrying; a missing
/// target, a checksum mismatch, or a permission error is not.
fn is_retryable(err: &Error) -> bool {
    matches!(err, Error::Transport { .. } | Error::Io { .. })
}

fn wrap_exhausted(err: Error, policy: &RetryPolicy<Error>) -> Error {
    if is_retryable(&err) {
        Error::retry_exhausted(
            "download",
            policy.retries.saturating_add(1),
            err.to_string(),
        )
    } else {
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable(&Error::transport(
            "https://example.com",
            "connection reset"
        )));
        assert!(!is_retryable(&Error::not_found("https://example.com")));
        assert!(!is_retryable(&Error::checksum_mismatch(
            PathBuf::from("/x"),
            "a",
            "b"
        )));
    }

    #[test]
    fn test_wrap_exhausted_only_wraps_retryable_errors() {
        let policy = default_retry_policy();
        let wrapped = wrap_exhausted(Error::transport("u", "reset"), &policy);
        assert!(matches!(wrapped, Error::RetryExhausted { attempts: 4, .. }));

        let passthrough = wrap_exhausted(Error::not_found("u"), &policy);
        assert!(matches!(passthrough, Error::NotFound { .. }));
    }
}
