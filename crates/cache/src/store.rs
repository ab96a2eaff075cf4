//! Artifact cache store
//!
//! Owns the on-disk layout of the cache: key derivation, entry paths,
//! metadata persistence, TTL validity, and the cleanup sweep. The store is
//! an explicit object with an owned root (never a process-wide singleton),
//! so tests and embedders can run multiple independent cache roots.

use crate::metadata::{ArtifactMetadata, METADATA_FILE_NAME, now_ms};
use dlx_core::{Error, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Default entry time-to-live: 7 days.
pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// File name of the per-entry lock sentinel.
pub const LOCK_FILE_NAME: &str = "concurrency.lock";

/// Compute the cache key for a download specification.
///
/// The key hashes the combined `url:name` string, not just the URL, so two
/// different logical artifacts from the same URL occupy distinct slots.
#[must_use]
pub fn compute_cache_key(url: &str, name: &str) -> String {
    let digest = Sha256::digest(format!("{url}:{name}").as_bytes());
    hex::encode(digest)
}

/// A cache entry as seen by listing and cleanup.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cache key (directory name).
    pub key: String,
    /// Path to the entry directory.
    pub path: PathBuf,
    /// Parsed metadata; `None` when missing or corrupt.
    pub metadata: Option<ArtifactMetadata>,
}

/// Result of a cleanup sweep.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupStats {
    /// Entries removed (expired or corrupt).
    pub removed: usize,
    /// Entries left in place.
    pub kept: usize,
    /// Entries whose removal failed and was skipped.
    pub failed: usize,
}

/// On-disk artifact cache.
#[derive(Debug, Clone)]
pub struct ArtifactCacheStore {
    root: PathBuf,
    ttl: Duration,
}

impl ArtifactCacheStore {
    /// Create a store rooted at `root` with the default TTL.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ttl: DEFAULT_TTL,
        }
    }

    /// Set the entry time-to-live.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// The cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The configured TTL.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Ensure the cache root exists.
    ///
    /// # Errors
    ///
    /// Surfaces permission-denied and read-only-filesystem failures with
    /// remediation hints.
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| Error::io(e, &self.root, "create_dir_all"))
    }

    /// Directory holding the entry for `key`.
    #[must_use]
    pub fn entry_dir(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Path of the cached artifact within the entry for `key`.
    #[must_use]
    pub fn artifact_path(&self, key: &str, name: &str) -> PathBuf {
        self.entry_dir(key).join(name)
    }

    /// Path of the metadata document for `key`.
    #[must_use]
    pub fn metadata_path(&self, key: &str) -> PathBuf {
        self.entry_dir(key).join(METADATA_FILE_NAME)
    }

    /// Path of the per-entry lock sentinel for `key`. The lock lives
    /// alongside the entry, not in a shared location, so unrelated keys
    /// never block each other.
    #[must_use]
    pub fn lock_path(&self, key: &str) -> PathBuf {
        self.entry_dir(key).join(LOCK_FILE_NAME)
    }

    /// Read and parse the metadata for `key`. Missing or corrupt metadata
    /// yields `None` - it is never silently trusted.
    #[must_use]
    pub fn read_metadata(&self, key: &str) -> Option<ArtifactMetadata> {
        let path = self.metadata_path(key);
        let content = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!(key, error = %e, "Corrupt cache metadata, treating entry as invalid");
                None
            }
        }
    }

    /// Persist metadata for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn write_metadata(&self, key: &str, meta: &ArtifactMetadata) -> Result<()> {
        let path = self.metadata_path(key);
        let json = serde_json::to_vec_pretty(meta)
            .map_err(|e| Error::serialization(format!("Failed to serialize metadata: {e}")))?;
        fs::write(&path, json).map_err(|e| Error::io(e, &path, "write"))
    }

    /// Check whether the entry for `key` is valid for reuse: its metadata
    /// exists, parses, carries a positive timestamp, and is younger than
    /// the TTL. Corrupt metadata is infinitely stale, never fresh.
    #[must_use]
    pub fn is_valid(&self, key: &str) -> bool {
        self.read_metadata(key)
            .is_some_and(|meta| self.is_fresh(&meta))
    }

    fn is_fresh(&self, meta: &ArtifactMetadata) -> bool {
        let age = meta.age_ms(now_ms());
        u128::from(age) < self.ttl.as_millis()
    }

    /// Remove the entry for `key` entirely.
    ///
    /// # Errors
    ///
    /// Returns an error if the recursive delete fails.
    pub fn invalidate(&self, key: &str) -> Result<()> {
        let dir = self.entry_dir(key);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| Error::io(e, &dir, "remove_dir_all"))?;
            debug!(key, "Invalidated cache entry");
        }
        Ok(())
    }

    /// List all entries in the cache root.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache root cannot be read.
    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        if !self.root.exists() {
            return Ok(entries);
        }

        let read_dir =
            fs::read_dir(&self.root).map_err(|e| Error::io(e, &self.root, "read_dir"))?;
        for entry in read_dir {
            let entry = entry.map_err(|e| Error::io(e, &self.root, "read_dir_entry"))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let key = entry.file_name().to_string_lossy().to_string();
            let metadata = self.read_metadata(&key);
            entries.push(CacheEntry {
                key,
                path,
                metadata,
            });
        }
        Ok(entries)
    }

    /// Sweep the cache, removing entries whose age exceeds the TTL and
    /// entries with missing or corrupt metadata (treated as infinitely
    /// old). Each entry's failure is caught and skipped independently so
    /// one bad entry cannot block reclaiming the rest.
    ///
    /// This is an independent maintenance operation: it takes no per-key
    /// lock, since a concurrent fresh download always re-validates its
    /// entry under its own lock before trusting it.
    ///
    /// # Errors
    ///
    /// Returns an error only if the cache root itself cannot be listed.
    pub fn cleanup(&self) -> Result<CleanupStats> {
        let mut stats = CleanupStats::default();
        for entry in self.entries()? {
            let expired = match &entry.metadata {
                Some(meta) => !self.is_fresh(meta),
                // Missing or unparsable metadata: infinitely old
                None => true,
            };
            if !expired {
                stats.kept += 1;
                continue;
            }
            match fs::remove_dir_all(&entry.path) {
                Ok(()) => {
                    debug!(key = %entry.key, "Removed expired cache entry");
                    stats.removed += 1;
                }
                Err(e) => {
                    warn!(
                        key = %entry.key,
                        error = %e,
                        "Failed to remove cache entry, skipping"
                    );
                    stats.failed += 1;
                }
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(tmp: &TempDir) -> ArtifactCacheStore {
        ArtifactCacheStore::new(tmp.path().join("cache"))
    }

    fn seed_entry(store: &ArtifactCacheStore, key: &str, meta: &ArtifactMetadata) {
        fs::create_dir_all(store.entry_dir(key)).unwrap();
        store.write_metadata(key, meta).unwrap();
    }

    #[test]
    fn test_cache_key_is_deterministic() {
        let a = compute_cache_key("https://example.com/jq", "jq");
        let b = compute_cache_key("https://example.com/jq", "jq");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_distinct_specs_get_distinct_keys() {
        let by_url = compute_cache_key("https://example.com/a", "tool");
        let by_name = compute_cache_key("https://example.com/a", "other");
        assert_ne!(by_url, by_name);
        assert_ne!(by_url, compute_cache_key("https://example.com/b", "tool"));
    }

    #[test]
    fn test_entry_layout() {
        let store = ArtifactCacheStore::new("/cache/root");
        assert_eq!(store.entry_dir("k"), PathBuf::from("/cache/root/k"));
        assert_eq!(
            store.artifact_path("k", "jq"),
            PathBuf::from("/cache/root/k/jq")
        );
        assert_eq!(
            store.metadata_path("k"),
            PathBuf::from("/cache/root/k/.dlx-metadata.json")
        );
        assert_eq!(
            store.lock_path("k"),
            PathBuf::from("/cache/root/k/concurrency.lock")
        );
    }

    #[test]
    fn test_fresh_entry_is_valid() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let meta = ArtifactMetadata::for_download("k", "https://example.com/a", "cafe", 4);
        seed_entry(&store, "k", &meta);
        assert!(store.is_valid("k"));
    }

    #[test]
    fn test_expired_entry_is_invalid() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp).with_ttl(Duration::from_millis(1000));
        let mut meta = ArtifactMetadata::for_download("k", "https://example.com/a", "cafe", 4);
        meta.timestamp = now_ms().saturating_sub(10_000);
        seed_entry(&store, "k", &meta);
        assert!(!store.is_valid("k"));
    }

    #[test]
    fn test_missing_metadata_is_invalid() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        fs::create_dir_all(store.entry_dir("k")).unwrap();
        assert!(!store.is_valid("k"));
    }

    #[test]
    fn test_corrupt_metadata_is_invalid() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        fs::create_dir_all(store.entry_dir("k")).unwrap();
        fs::write(store.metadata_path("k"), "not json {").unwrap();
        assert!(!store.is_valid("k"));
    }

    #[test]
    fn test_zero_timestamp_is_invalid() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let mut meta = ArtifactMetadata::for_download("k", "https://example.com/a", "cafe", 4);
        meta.timestamp = 0;
        seed_entry(&store, "k", &meta);
        assert!(!store.is_valid("k"));
    }

    #[test]
    fn test_invalidate_removes_entry() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let meta = ArtifactMetadata::for_download("k", "https://example.com/a", "cafe", 4);
        seed_entry(&store, "k", &meta);
        assert!(store.entry_dir("k").exists());

        store.invalidate("k").unwrap();
        assert!(!store.entry_dir("k").exists());
        // Invalidating a missing entry is fine
        store.invalidate("k").unwrap();
    }

    #[test]
    fn test_cleanup_removes_expired_and_corrupt_entries() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp).with_ttl(Duration::from_secs(60));

        // Fresh entry stays
        let fresh = ArtifactMetadata::for_download("fresh", "https://example.com/a", "aa", 1);
        seed_entry(&store, "fresh", &fresh);

        // Expired entry goes
        let mut old = ArtifactMetadata::for_download("old", "https://example.com/b", "bb", 1);
        old.timestamp = now_ms().saturating_sub(600_000);
        seed_entry(&store, "old", &old);

        // Corrupt metadata goes
        fs::create_dir_all(store.entry_dir("corrupt")).unwrap();
        fs::write(store.metadata_path("corrupt"), "][").unwrap();

        // Missing metadata goes
        fs::create_dir_all(store.entry_dir("bare")).unwrap();

        let stats = store.cleanup().unwrap();
        assert_eq!(stats.removed, 3);
        assert_eq!(stats.kept, 1);
        assert_eq!(stats.failed, 0);
        assert!(store.entry_dir("fresh").exists());
        assert!(!store.entry_dir("old").exists());
        assert!(!store.entry_dir("corrupt").exists());
        assert!(!store.entry_dir("bare").exists());
    }

    #[test]
    fn test_cleanup_skips_stray_files() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        store.init().unwrap();
        fs::write(store.root().join("stray.json"), "{}").unwrap();

        let stats = store.cleanup().unwrap();
        assert_eq!(stats.removed, 0);
        assert!(store.root().join("stray.json").exists());
    }

    #[test]
    fn test_entries_lists_metadata() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let meta = ArtifactMetadata::for_download("k", "https://example.com/a", "cafe", 4);
        seed_entry(&store, "k", &meta);
        fs::create_dir_all(store.entry_dir("broken")).unwrap();

        let mut entries = store.entries().unwrap();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, "broken");
        assert!(entries[0].metadata.is_none());
        assert_eq!(entries[1].key, "k");
        assert!(entries[1].metadata.is_some());
    }

    #[test]
    fn test_entries_on_missing_root_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        assert!(store.entries().unwrap().is_empty());
    }
}
