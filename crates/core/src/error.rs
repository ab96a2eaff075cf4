//! Error types shared across the dlx crates

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for dlx operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error during cache or download operations
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(dlx::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "create_dir_all")
        operation: String,
    },

    /// Permission denied accessing a cache path
    #[error("Permission denied: {}", path.display())]
    #[diagnostic(
        code(dlx::permission_denied),
        help(
            "The cache directory is not writable by the current user. \
             Fix its ownership or point DLX_CACHE_DIR at a writable location"
        )
    )]
    PermissionDenied {
        /// Path that could not be accessed
        path: Box<Path>,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The filesystem backing the cache is mounted read-only
    #[error("Read-only filesystem: {}", path.display())]
    #[diagnostic(
        code(dlx::read_only_filesystem),
        help("Point DLX_CACHE_DIR at a writable filesystem")
    )]
    ReadOnlyFilesystem {
        /// Path on the read-only filesystem
        path: Box<Path>,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Downloaded bytes did not match the expected checksum
    #[error("Checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    #[diagnostic(
        code(dlx::checksum_mismatch),
        help("The corrupt artifact was removed; retry the download or verify the expected checksum")
    )]
    ChecksumMismatch {
        /// Path of the artifact that failed verification (already removed)
        path: Box<Path>,
        /// Checksum the caller expected
        expected: String,
        /// Checksum of the downloaded bytes
        actual: String,
    },

    /// Transport-level download failure
    #[error("Download failed for {url}: {message}")]
    #[diagnostic(code(dlx::transport))]
    Transport {
        /// URL that failed to download
        url: String,
        /// One-line cause
        message: String,
    },

    /// Download target does not exist
    #[error("Download target not found: {url}")]
    #[diagnostic(
        code(dlx::not_found),
        help("Verify the URL and that the artifact has been published")
    )]
    NotFound {
        /// URL that returned not-found
        url: String,
    },

    /// An operation failed after exhausting its retry budget
    #[error("{operation} failed after {attempts} attempts: {message}")]
    #[diagnostic(code(dlx::retry_exhausted))]
    RetryExhausted {
        /// Name of the operation that was retried
        operation: String,
        /// Total attempts made
        attempts: u32,
        /// Last error observed
        message: String,
    },

    /// Cross-process lock failure
    #[error("Lock error: {message}")]
    #[diagnostic(code(dlx::lock))]
    Lock {
        /// One-line cause
        message: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(code(dlx::serialization))]
    Serialization {
        /// Error message describing the serialization issue
        message: String,
    },

    /// Configuration or validation error
    #[error("Configuration error: {message}")]
    #[diagnostic(code(dlx::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },
}

impl Error {
    /// Create an I/O error with path context, promoting permission and
    /// read-only failures to their dedicated variants.
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                path: path.as_ref().into(),
                source,
            },
            std::io::ErrorKind::ReadOnlyFilesystem => Self::ReadOnlyFilesystem {
                path: path.as_ref().into(),
                source,
            },
            _ => Self::Io {
                source,
                path: Some(path.as_ref().into()),
                operation: operation.into(),
            },
        }
    }

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Create a checksum mismatch error
    #[must_use]
    pub fn checksum_mismatch(
        path: impl AsRef<Path>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::ChecksumMismatch {
            path: path.as_ref().into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a transport error
    #[must_use]
    pub fn transport(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a not-found error
    #[must_use]
    pub fn not_found(url: impl Into<String>) -> Self {
        Self::NotFound { url: url.into() }
    }

    /// Create a retry-exhausted error
    #[must_use]
    pub fn retry_exhausted(
        operation: impl Into<String>,
        attempts: u32,
        message: impl Into<String>,
    ) -> Self {
        Self::RetryExhausted {
            operation: operation.into(),
            attempts,
            message: message.into(),
        }
    }

    /// Create a lock error
    #[must_use]
    pub fn lock(message: impl std::fmt::Display) -> Self {
        Self::Lock {
            message: message.to_string(),
        }
    }

    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }
}

/// Result type alias for dlx operations
pub type Result<T> = std::result::Result<T, Error>;
