//! End-to-end coordinator behavior over a real temp-dir cache with an
//! in-memory transport.

use async_trait::async_trait;
use dlx_cache::{
    AcquireOptions, ArtifactCacheStore, DownloadCoordinator, DownloadSpec, Error, Result,
    Transport,
};
use dlx_runner::RetryPolicy;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Transport that "downloads" a fixed payload, optionally slowly or after
/// a number of simulated transient failures.
struct MockTransport {
    payload: Vec<u8>,
    calls: AtomicUsize,
    delay: Duration,
    fail_first: usize,
}

impl MockTransport {
    fn new(payload: &[u8]) -> Self {
        Self {
            payload: payload.to_vec(),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            fail_first: 0,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn with_transient_failures(mut self, count: usize) -> Self {
        self.fail_first = count;
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if call < self.fail_first {
            return Err(Error::transport(url, "simulated connection reset"));
        }
        tokio::fs::write(dest, &self.payload)
            .await
            .map_err(|e| Error::io(e, dest, "write"))
    }
}

fn coordinator_in(
    tmp: &TempDir,
    transport: Arc<MockTransport>,
) -> DownloadCoordinator {
    let store = ArtifactCacheStore::new(tmp.path().join("cache"));
    DownloadCoordinator::new(store, transport)
}

fn fast_retry_policy() -> RetryPolicy<Error> {
    RetryPolicy::new()
        .with_retries(3)
        .with_base_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(10))
}

#[tokio::test]
async fn idempotent_cache_hit_downloads_once() {
    let tmp = TempDir::new().unwrap();
    let transport = Arc::new(MockTransport::new(b"binary bytes"));
    let coordinator = coordinator_in(&tmp, transport.clone());
    let spec = DownloadSpec::new("https://example.com/tool", "tool");

    let first = coordinator
        .acquire(&spec, &AcquireOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert!(first.downloaded);

    let second = coordinator
        .acquire(&spec, &AcquireOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert!(!second.downloaded);
    assert_eq!(second.path, first.path);
    assert_eq!(second.checksum, first.checksum);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn concurrent_acquisitions_converge_on_one_download() {
    let tmp = TempDir::new().unwrap();
    let transport =
        Arc::new(MockTransport::new(b"shared payload").with_delay(Duration::from_millis(300)));
    let spec = DownloadSpec::new("https://example.com/tool", "tool");

    // Two coordinators over the same cache root simulate two processes:
    // they share no in-memory state, only the filesystem.
    let a = Arc::new(coordinator_in(&tmp, transport.clone()));
    let b = Arc::new(coordinator_in(&tmp, transport.clone()));

    let spec_a = spec.clone();
    let task_a =
        tokio::spawn(
            async move { a.acquire(&spec_a, &AcquireOptions::new()).await },
        );
    let spec_b = spec.clone();
    let task_b =
        tokio::spawn(
            async move { b.acquire(&spec_b, &AcquireOptions::new()).await },
        );

    let result_a = task_a.await.unwrap().unwrap().unwrap();
    let result_b = task_b.await.unwrap().unwrap().unwrap();

    assert_eq!(transport.calls(), 1);
    assert_eq!(result_a.path, result_b.path);
    assert_eq!(result_a.checksum, result_b.checksum);
    // Exactly one of the two performed the download
    assert!(result_a.downloaded ^ result_b.downloaded);
}

#[tokio::test]
async fn checksum_mismatch_removes_artifact_and_fails() {
    let tmp = TempDir::new().unwrap();
    let transport = Arc::new(MockTransport::new(b"hello world"));
    let coordinator = coordinator_in(&tmp, transport.clone());
    let spec = DownloadSpec::new("https://example.com/tool", "tool")
        .with_checksum("deadbeef");

    let err = coordinator
        .acquire(&spec, &AcquireOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ChecksumMismatch { .. }));

    // No stale or corrupt file remains
    let key = dlx_cache::compute_cache_key(&spec.url, &spec.name);
    let artifact = coordinator.store().artifact_path(&key, &spec.name);
    assert!(!artifact.exists());
}

#[tokio::test]
async fn matching_checksum_is_accepted() {
    let tmp = TempDir::new().unwrap();
    let transport = Arc::new(MockTransport::new(b"hello world"));
    let coordinator = coordinator_in(&tmp, transport.clone());
    // sha256 of "hello world", uppercase to exercise case-insensitive compare
    let spec = DownloadSpec::new("https://example.com/tool", "tool").with_checksum(
        "B94D27B9934D3E08A52E52D7DA7DABFAC484EFE37A5380EE9088F7ACE2EFCDE9",
    );

    let acquired = coordinator
        .acquire(&spec, &AcquireOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert!(acquired.downloaded);
    assert_eq!(
        acquired.checksum,
        "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
    );
}

#[tokio::test]
async fn expired_entry_triggers_fresh_download() {
    let tmp = TempDir::new().unwrap();
    let transport = Arc::new(MockTransport::new(b"payload"));
    let coordinator = coordinator_in(&tmp, transport.clone());
    let spec = DownloadSpec::new("https://example.com/tool", "tool");

    coordinator
        .acquire(&spec, &AcquireOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(transport.calls(), 1);

    // Age the entry past the TTL
    let key = dlx_cache::compute_cache_key(&spec.url, &spec.name);
    let store = coordinator.store();
    let mut meta = store.read_metadata(&key).unwrap();
    meta.timestamp = meta.timestamp.saturating_sub(30 * 24 * 60 * 60 * 1000);
    store.write_metadata(&key, &meta).unwrap();

    let again = coordinator
        .acquire(&spec, &AcquireOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert!(again.downloaded);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn malformed_metadata_is_never_trusted() {
    let tmp = TempDir::new().unwrap();
    let transport = Arc::new(MockTransport::new(b"payload"));
    let coordinator = coordinator_in(&tmp, transport.clone());
    let spec = DownloadSpec::new("https://example.com/tool", "tool");

    coordinator
        .acquire(&spec, &AcquireOptions::new())
        .await
        .unwrap()
        .unwrap();

    let key = dlx_cache::compute_cache_key(&spec.url, &spec.name);
    std::fs::write(coordinator.store().metadata_path(&key), "{ not json").unwrap();

    let again = coordinator
        .acquire(&spec, &AcquireOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert!(again.downloaded);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn force_bypasses_a_valid_entry() {
    let tmp = TempDir::new().unwrap();
    let transport = Arc::new(MockTransport::new(b"payload"));
    let coordinator = coordinator_in(&tmp, transport.clone());
    let spec = DownloadSpec::new("https://example.com/tool", "tool");

    coordinator
        .acquire(&spec, &AcquireOptions::new())
        .await
        .unwrap()
        .unwrap();
    let forced = coordinator
        .acquire(&spec, &AcquireOptions::new().with_force(true))
        .await
        .unwrap()
        .unwrap();
    assert!(forced.downloaded);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn transient_failures_are_retried_at_the_transport_layer() {
    let tmp = TempDir::new().unwrap();
    let transport = Arc::new(
        MockTransport::new(b"eventually fine").with_transient_failures(2),
    );
    let coordinator =
        coordinator_in(&tmp, transport.clone()).with_retry_policy(fast_retry_policy());
    let spec = DownloadSpec::new("https://example.com/tool", "tool");

    let acquired = coordinator
        .acquire(&spec, &AcquireOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert!(acquired.downloaded);
    assert_eq!(transport.calls(), 3);
}

#[tokio::test]
async fn exhausted_retries_surface_as_retry_exhausted() {
    let tmp = TempDir::new().unwrap();
    let transport = Arc::new(
        MockTransport::new(b"never delivered").with_transient_failures(usize::MAX),
    );
    let coordinator =
        coordinator_in(&tmp, transport.clone()).with_retry_policy(fast_retry_policy());
    let spec = DownloadSpec::new("https://example.com/tool", "tool");

    let err = coordinator
        .acquire(&spec, &AcquireOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RetryExhausted { .. }));
    assert_eq!(transport.calls(), 4);
}

#[tokio::test]
async fn canceled_acquisition_resolves_to_none() {
    let tmp = TempDir::new().unwrap();
    let transport = Arc::new(MockTransport::new(b"payload"));
    let coordinator = coordinator_in(&tmp, transport.clone());
    let spec = DownloadSpec::new("https://example.com/tool", "tool");

    let token = CancellationToken::new();
    token.cancel();
    let options = AcquireOptions::new().with_cancel(token);

    let result = coordinator.acquire(&spec, &options).await.unwrap();
    assert!(result.is_none());
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn distinct_names_from_one_url_use_distinct_entries() {
    let tmp = TempDir::new().unwrap();
    let transport = Arc::new(MockTransport::new(b"payload"));
    let coordinator = coordinator_in(&tmp, transport.clone());

    let a = coordinator
        .acquire(
            &DownloadSpec::new("https://example.com/dist", "alpha"),
            &AcquireOptions::new(),
        )
        .await
        .unwrap()
        .unwrap();
    let b = coordinator
        .acquire(
            &DownloadSpec::new("https://example.com/dist", "beta"),
            &AcquireOptions::new(),
        )
        .await
        .unwrap()
        .unwrap();

    assert_ne!(a.path, b.path);
    assert_eq!(transport.calls(), 2);
}

#[cfg(unix)]
#[tokio::test]
async fn downloaded_artifact_is_executable() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = TempDir::new().unwrap();
    let transport = Arc::new(MockTransport::new(b"#!/bin/sh\nexit 0\n"));
    let coordinator = coordinator_in(&tmp, transport.clone());
    let spec = DownloadSpec::new("https://example.com/tool", "tool");

    let acquired = coordinator
        .acquire(&spec, &AcquireOptions::new())
        .await
        .unwrap()
        .unwrap();
    let mode = std::fs::metadata(&acquired.path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);
}

#[tokio::test]
async fn metadata_records_the_download() {
    let tmp = TempDir::new().unwrap();
    let transport = Arc::new(MockTransport::new(b"payload"));
    let coordinator = coordinator_in(&tmp, transport.clone());
    let spec = DownloadSpec::new("https://example.com/tool", "tool");

    let acquired = coordinator
        .acquire(&spec, &AcquireOptions::new())
        .await
        .unwrap()
        .unwrap();

    let key = dlx_cache::compute_cache_key(&spec.url, &spec.name);
    let meta = coordinator.store().read_metadata(&key).unwrap();
    assert_eq!(meta.cache_key, key);
    assert_eq!(meta.checksum, acquired.checksum);
    assert_eq!(meta.checksum_algorithm, "sha256");
    assert_eq!(meta.size, 7);
    assert!(meta.timestamp > 0);
    assert_eq!(
        meta.source,
        dlx_cache::ArtifactSource::Download {
            url: spec.url.clone()
        }
    );
}
