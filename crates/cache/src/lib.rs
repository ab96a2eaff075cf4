//! Binary artifact download cache for dlx
//!
//! This crate implements the "download and execute" acquisition layer:
//! a content-addressable cache of downloaded binaries that stays correct
//! when multiple independent OS processes race to fetch the same artifact.
//!
//! # Overview
//!
//! - [`ArtifactCacheStore`] - entry layout, cache keys, metadata, TTL
//!   validity, cleanup sweep
//! - [`DownloadCoordinator`] - orchestrates cache hit checks, per-entry
//!   cross-process locking, retry-wrapped downloads, and checksum
//!   verification
//! - [`Transport`] - the seam to the HTTP layer, implemented by
//!   [`HttpTransport`]
//! - [`exec`] - runs a cached artifact, with command-shell wrapping for
//!   Windows script binaries
//!
//! # Cache Layout
//!
//! ```text
//! <cacheRoot>/
//! └── <cacheKey>/                 # sha256 of "url:name"
//!     ├── <artifactName>          # the binary itself
//!     ├── .dlx-metadata.json      # entry metadata
//!     └── concurrency.lock        # ephemeral, only while downloading
//! ```
//!
//! Completed entries are immutable: they are only ever replaced wholesale
//! under the entry lock, never edited in place, so reading a valid entry
//! requires no locking.

pub mod coordinator;
pub mod exec;
mod hashing;
pub mod metadata;
pub mod store;
pub mod transport;

pub use coordinator::{AcquireOptions, AcquiredArtifact, DownloadCoordinator};
pub use dlx_core::{DownloadSpec, Error, Result};
pub use hashing::compute_file_sha256;
pub use metadata::{ArtifactMetadata, ArtifactSource, METADATA_FILE_NAME, METADATA_VERSION};
pub use store::{
    ArtifactCacheStore, CacheEntry, CleanupStats, DEFAULT_TTL, LOCK_FILE_NAME, compute_cache_key,
};
pub use transport::{HttpTransport, Transport};
