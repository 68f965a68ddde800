//! Error types for wallpaper-updater.

use crate::upgrade::{ChecksumError, DownloadError, ExtractError, FeedError, ReplaceError};
use thiserror::Error;

/// Result type alias using the crate error.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the update engine.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error outside a specific update stage.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded, saved or validated.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The release feed could not be fetched or decoded.
    #[error(transparent)]
    Feed(#[from] FeedError),

    /// The release asset could not be downloaded.
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// The downloaded archive could not be unpacked.
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// The downloaded archive failed verification.
    #[error(transparent)]
    Checksum(#[from] ChecksumError),

    /// The installed bundle could not be replaced.
    #[error(transparent)]
    Replace(#[from] ReplaceError),

    /// The new bundle could not be relaunched.
    #[error("Relaunch failed: {0}")]
    Relaunch(String),
}

impl Error {
    /// Whether the install was left with only a backup bundle on disk.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Replace(e) if e.is_degraded())
    }
}
