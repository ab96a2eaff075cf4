//! Download specification.

use serde::{Deserialize, Serialize};

/// The logical description of an artifact to acquire.
///
/// A spec pairs the download URL with the artifact's logical name; both
/// participate in cache-key derivation so two different logical artifacts
/// served from the same URL occupy distinct cache slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadSpec {
    /// URL the artifact is downloaded from.
    pub url: String,
    /// Logical artifact name; also the on-disk file name within the entry.
    pub name: String,
    /// Expected SHA-256 checksum of the downloaded bytes, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl DownloadSpec {
    /// Create a spec for `url` naming the artifact `name`.
    #[must_use]
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            checksum: None,
        }
    }

    /// Set the expected checksum.
    #[must_use]
    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let spec = DownloadSpec::new("https://example.com/jq", "jq").with_checksum("abc123");
        assert_eq!(spec.url, "https://example.com/jq");
        assert_eq!(spec.name, "jq");
        assert_eq!(spec.checksum.as_deref(), Some("abc123"));
    }
}
