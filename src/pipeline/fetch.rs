//! Resource fetching: materialise a locator as a local file.
//!
//! [`ResourceFetcher`] is the seam between the pipeline and the transport.
//! The production implementation, [`HttpFetcher`], streams an HTTP GET body
//! straight to disk so large images never sit fully in memory.
//!
//! ## Contract
//!
//! * Success returns only after the body has been flushed and synced, so the
//!   next stage can open the file immediately.
//! * Failure never leaves a partial file at `destination`.
//! * An existing file at `destination` is overwritten.

use crate::error::VqaError;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Fetch-by-locator capability.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// Download `locator` to `destination` and return `destination`.
    async fn fetch(&self, locator: &str, destination: &Path) -> Result<PathBuf, VqaError>;
}

/// HTTP GET fetcher backed by a shared `reqwest::Client`.
///
/// Build it once at the composition root; the client pools connections
/// across every locator and every run.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpFetcher {
    /// Create a fetcher whose requests time out after `timeout_secs`.
    pub fn new(timeout_secs: u64) -> Result<Self, VqaError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| VqaError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            timeout_secs,
        })
    }

    /// Wrap an existing client (custom TLS, proxies, headers).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout_secs: 0,
        }
    }

    fn describe(&self, e: &reqwest::Error) -> String {
        if e.is_timeout() && self.timeout_secs > 0 {
            format!("timed out after {}s", self.timeout_secs)
        } else {
            e.to_string()
        }
    }

    async fn stream_to_file(
        &self,
        locator: &str,
        response: reqwest::Response,
        destination: &Path,
    ) -> Result<u64, VqaError> {
        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(|e| VqaError::retrieval(locator, format!("cannot create file: {e}")))?;

        let mut written: u64 = 0;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| VqaError::retrieval(locator, self.describe(&e)))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| VqaError::retrieval(locator, format!("write failed: {e}")))?;
            written += chunk.len() as u64;
        }

        file.flush()
            .await
            .map_err(|e| VqaError::retrieval(locator, format!("flush failed: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| VqaError::retrieval(locator, format!("sync failed: {e}")))?;

        Ok(written)
    }
}

#[async_trait]
impl ResourceFetcher for HttpFetcher {
    async fn fetch(&self, locator: &str, destination: &Path) -> Result<PathBuf, VqaError> {
        info!("Downloading image from: {}", locator);

        let response = self
            .client
            .get(locator)
            .send()
            .await
            .map_err(|e| VqaError::retrieval(locator, self.describe(&e)))?;

        if response.status() != StatusCode::OK {
            return Err(VqaError::retrieval(
                locator,
                format!("HTTP {}", response.status()),
            ));
        }

        match self.stream_to_file(locator, response, destination).await {
            Ok(bytes) => {
                debug!("Downloaded {} bytes to {}", bytes, destination.display());
                Ok(destination.to_path_buf())
            }
            Err(e) => {
                remove_partial(destination).await;
                Err(e)
            }
        }
    }
}

/// Remove a partially written download. A missing file is fine.
pub(crate) async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial download {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove partial download {}: {}", path.display(), e),
    }
}
