//! Streamed artifact download with progress reporting.

use futures::StreamExt;
use reqwest::StatusCode;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Errors from downloading a release asset.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The transfer could not be started or was interrupted.
    #[error("download failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("download returned HTTP {0}")]
    Status(StatusCode),

    /// The payload could not be written to disk.
    #[error("failed to write download: {0}")]
    Io(#[from] std::io::Error),

    /// The server sent no bytes.
    #[error("download was empty")]
    Empty,
}

/// Streams a remote archive to disk.
///
/// Bytes land in `<destination>.part` and are renamed onto the destination only
/// once the whole body is on disk and synced, so the destination path is either
/// absent or complete. Dropping the returned future cancels the transfer; the
/// partial file is left in the caller's working directory for it to remove.
#[derive(Clone)]
pub struct ArtifactDownloader {
    client: reqwest::Client,
}

impl ArtifactDownloader {
    /// Create a downloader.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(connect_timeout: Duration) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("wallpaper-updater/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Download `url` to `destination`, reporting progress as a fraction.
    ///
    /// `on_progress` is only called when the server announces a non-zero
    /// length, with strictly increasing values ending in `1.0` once the body
    /// is on disk.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, a non-success status, a write
    /// failure or an empty body. No partial file is left at `destination`.
    pub async fn download<F>(
        &self,
        url: &str,
        destination: &Path,
        mut on_progress: F,
    ) -> Result<u64, DownloadError>
    where
        F: FnMut(f64) + Send,
    {
        let partial = partial_path(destination);
        info!("Downloading {} to {}", url, destination.display());

        match self.stream_to(url, &partial, &mut on_progress).await {
            Ok(0) => {
                discard(&partial).await;
                Err(DownloadError::Empty)
            }
            Ok(written) => {
                fs::rename(&partial, destination).await?;
                info!("Downloaded {} bytes", written);
                Ok(written)
            }
            Err(e) => {
                discard(&partial).await;
                Err(e)
            }
        }
    }

    async fn stream_to<F>(
        &self,
        url: &str,
        partial: &Path,
        on_progress: &mut F,
    ) -> Result<u64, DownloadError>
    where
        F: FnMut(f64) + Send,
    {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status(status));
        }

        let expected = response.content_length().filter(|len| *len > 0);
        debug!("Expected download size: {:?}", expected);

        let mut file = fs::File::create(partial).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        let mut reported = 0.0_f64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;

            if let Some(total) = expected {
                #[allow(clippy::cast_precision_loss)]
                let fraction = (written as f64 / total as f64).min(1.0);
                if fraction > reported {
                    reported = fraction;
                    on_progress(fraction);
                }
            }
        }

        file.flush().await?;
        file.sync_all().await?;

        if expected.is_some() && written > 0 && reported < 1.0 {
            on_progress(1.0);
        }
        Ok(written)
    }
}

/// Staging path for an in-flight download.
fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map_or_else(|| OsString::from("download"), OsString::from);
    name.push(".part");
    destination.with_file_name(name)
}

async fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove partial download {}: {}", path.display(), e);
        }
    }
}
