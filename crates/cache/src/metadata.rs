//! Cache entry metadata
//!
//! Each entry directory carries a `.dlx-metadata.json` describing the
//! cached artifact. The timestamp records the moment the download
//! *completed*, never when it started, so TTL is measured from successful
//! completion.

use dlx_core::Platform;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// File name of the metadata document within an entry directory.
pub const METADATA_FILE_NAME: &str = ".dlx-metadata.json";

/// Current metadata schema version.
pub const METADATA_VERSION: &str = "1.0.0";

/// Where the cached bytes came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ArtifactSource {
    /// Downloaded from a URL.
    Download {
        /// Source URL.
        url: String,
    },
    /// Produced by decompressing a local archive.
    Decompression {
        /// Path of the archive the artifact was extracted from.
        path: String,
    },
}

/// Metadata about a cached artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// Metadata schema version
    pub version: String,
    /// Cache key; matches the entry directory name
    pub cache_key: String,
    /// Write time in milliseconds since the epoch (download completion)
    pub timestamp: u64,
    /// Checksum of the artifact bytes
    pub checksum: String,
    /// Algorithm the checksum was computed with
    pub checksum_algorithm: String,
    /// Host operating system the artifact was fetched for
    pub platform: String,
    /// Host CPU architecture
    pub arch: String,
    /// Artifact size in bytes
    pub size: u64,
    /// Source descriptor
    pub source: ArtifactSource,
    /// Free-form extension fields
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ArtifactMetadata {
    /// Create metadata for a freshly downloaded artifact, stamped with the
    /// current time and host platform.
    #[must_use]
    pub fn for_download(
        cache_key: impl Into<String>,
        url: impl Into<String>,
        checksum: impl Into<String>,
        size: u64,
    ) -> Self {
        let platform = Platform::current();
        Self {
            version: METADATA_VERSION.to_string(),
            cache_key: cache_key.into(),
            timestamp: now_ms(),
            checksum: checksum.into(),
            checksum_algorithm: "sha256".to_string(),
            platform: platform.os.to_string(),
            arch: platform.arch.to_string(),
            size,
            source: ArtifactSource::Download { url: url.into() },
            extra: BTreeMap::new(),
        }
    }

    /// Age of this entry relative to `now` in milliseconds. A zero or
    /// future timestamp yields `u64::MAX` ("infinitely stale") so corrupt
    /// metadata never reads as fresh.
    #[must_use]
    pub fn age_ms(&self, now: u64) -> u64 {
        if self.timestamp == 0 || self.timestamp > now {
            u64::MAX
        } else {
            now - self.timestamp
        }
    }
}

/// Current time in milliseconds since the epoch.
#[must_use]
pub fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}
