//! URL download with progress reporting.
//!
//! The vault's ordering guarantees lean on `download_to` completing only
//! once the destination file is fully written: prepare never starts while
//! a download is still streaming. On failure the destination may hold a
//! partial file; the caller's tentative-file guard reclaims it.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::VaultConfig;

/// Receives periodic progress notifications as a completed fraction.
pub trait ProgressMonitor: Send {
    fn on_progress(&mut self, fraction: f64);
}

impl<F> ProgressMonitor for F
where
    F: FnMut(f64) + Send,
{
    fn on_progress(&mut self, fraction: f64) {
        self(fraction)
    }
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("download of {url} failed: {reason}")]
    Http { url: String, reason: String },

    #[error("download of {url} failed writing {}: {source}", .path.display())]
    Io {
        url: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("download of {url} timed out")]
    Timeout { url: String },

    #[error("failed to construct HTTP client: {reason}")]
    Client { reason: String },
}

/// Fetches a URL to a local path.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download_to(
        &self,
        url: &str,
        dest: &Path,
        monitor: &mut dyn ProgressMonitor,
    ) -> Result<(), DownloadError>;
}

/// Streaming HTTP downloader.
pub struct HttpDownloader {
    client: reqwest::Client,
    timeout: std::time::Duration,
}

impl HttpDownloader {
    pub fn new(config: &VaultConfig) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|error| DownloadError::Client {
                reason: error.to_string(),
            })?;
        Ok(Self {
            client,
            timeout: config.download_timeout,
        })
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download_to(
        &self,
        url: &str,
        dest: &Path,
        monitor: &mut dyn ProgressMonitor,
    ) -> Result<(), DownloadError> {
        debug!(url, dest = %dest.display(), "starting download");

        let response = tokio::time::timeout(self.timeout, self.client.get(url).send())
            .await
            .map_err(|_| DownloadError::Timeout {
                url: url.to_string(),
            })?
            .map_err(|error| DownloadError::Http {
                url: url.to_string(),
                reason: error.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(DownloadError::Http {
                url: url.to_string(),
                reason: format!("server returned {}", response.status()),
            });
        }

        let total = response.content_length().filter(|len| *len > 0);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|source| DownloadError::Io {
                url: url.to_string(),
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut file = fs::File::create(dest).map_err(|source| DownloadError::Io {
            url: url.to_string(),
            path: dest.to_path_buf(),
            source,
        })?;
        let mut written = 0u64;
        let mut response = response;
        while let Some(chunk) = response.chunk().await.map_err(|error| DownloadError::Http {
            url: url.to_string(),
            reason: error.to_string(),
        })? {
            file.write_all(&chunk).map_err(|source| DownloadError::Io {
                url: url.to_string(),
                path: dest.to_path_buf(),
                source,
            })?;
            written += chunk.len() as u64;
            if let Some(total) = total {
                monitor.on_progress(written as f64 / total as f64);
            }
        }
        file.sync_all().map_err(|source| DownloadError::Io {
            url: url.to_string(),
            path: dest.to_path_buf(),
            source,
        })?;
        drop(file);
        monitor.on_progress(1.0);

        info!(url, bytes = written, "download complete");
        Ok(())
    }
}
