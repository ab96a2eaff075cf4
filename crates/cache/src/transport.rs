//! Download transport seam.
//!
//! The coordinator talks to HTTP only through the [`Transport`] trait so
//! tests can substitute an in-memory implementation. The real
//! implementation is a thin reqwest wrapper; retry policy lives in the
//! coordinator, not here.

use async_trait::async_trait;
use dlx_core::{Error, Result};
use futures::StreamExt;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Fetches bytes from a URL into a destination file.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Download `url` into `dest`, following redirects. Failures are
    /// reported as errors; a partial file may remain at `dest` and the
    /// caller is responsible for discarding it.
    async fn download(&self, url: &str, dest: &Path) -> Result<()>;
}

/// HTTP transport backed by reqwest.
///
/// Redirects are followed (reqwest's default policy, up to 10 hops) and
/// response bytes are streamed to the destination file rather than
/// buffered in memory.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    /// Create a new HTTP transport.
    ///
    /// # Panics
    ///
    /// Uses `expect` internally because `reqwest::Client::builder().build()`
    /// only fails with invalid TLS configuration, which cannot happen with
    /// default settings. The panic indicates a fundamental environment issue.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent("dlx")
                .build()
                .expect("Failed to create HTTP client - TLS backend initialization failed"),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        debug!(%url, "Downloading");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::transport(url, e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::not_found(url));
        }
        if !response.status().is_success() {
            return Err(Error::transport(
                url,
                format!("HTTP {}", response.status()),
            ));
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| Error::io(e, dest, "create"))?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::transport(url, e.to_string()))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| Error::io(e, dest, "write"))?;
        }
        file.flush().await.map_err(|e| Error::io(e, dest, "flush"))?;
        Ok(())
    }
}
