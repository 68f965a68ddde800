//! Self-update system with rollback-safe bundle replacement.
//!
//! This module handles:
//! - Polling the release feed for new versions
//! - Streaming the release archive into a private working directory
//! - Unpacking it with the system archive tool
//! - Replacing the running bundle with rollback support

mod checksum;
mod controller;
mod download;
mod extract;
mod monitor;
mod platform;
mod replace;
mod session;
mod version;

pub use checksum::{ChecksumError, ChecksumVerifier};
pub use controller::UpdateController;
pub use download::{ArtifactDownloader, DownloadError};
pub use extract::{find_bundle, ArchiveExtractor, ExtractError};
pub use monitor::{FeedError, ReleaseAsset, ReleaseFeedClient, ReleaseMetadata};
pub use platform::{bundle_from_exe, Platform, SystemPlatform};
pub use replace::{backup_path, FileOps, InstallReplacer, LocalFileOps, ReplaceError};
pub use session::UpdateSession;
pub use version::{current_version, is_newer, normalize_tag};

use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Information about an available update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateInfo {
    /// The new version, without the leading `v`.
    pub version: String,
    /// Release page, used as the manual fallback.
    pub release_page: String,
    /// Download URL of the bundle archive, if the release carries one.
    pub download_url: Option<String>,
    /// Download URL of the `.sha256` companion asset, if present.
    pub checksum_url: Option<String>,
}

/// Observable state of the update controller.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum UpdateState {
    /// No session is active.
    #[default]
    Idle,
    /// The release archive is being downloaded.
    Downloading {
        /// Fraction of the archive written so far, `0.0..=1.0`.
        progress: f64,
    },
    /// The archive is being unpacked and swapped in.
    Installing,
    /// The last session failed; resets to [`UpdateState::Idle`] shortly.
    Failed {
        /// User-facing failure message.
        message: String,
    },
}

impl UpdateState {
    /// Whether no session is active.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

/// Snapshot of what the controller knows about updates.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatus {
    /// Version of the running app.
    pub current_version: String,
    /// Newest version seen by the last successful check, if newer.
    pub latest_version: Option<String>,
    /// Whether the last check found a newer release.
    pub update_available: bool,
    /// When the feed was last read successfully.
    pub last_checked: Option<DateTime<Utc>>,
    /// Current session state.
    pub state: UpdateState,
}

/// Result of an update attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The new bundle is installed and was relaunched.
    Installed {
        /// The installed version.
        version: String,
        /// Path of the installed bundle.
        bundle: PathBuf,
    },
    /// No in-place update was possible; the release page was opened instead.
    OpenedReleasePage,
    /// The session failed and the manual fallback was offered.
    Failed {
        /// Error that ended the session.
        reason: String,
        /// Whether the install was left with only the backup bundle.
        degraded: bool,
    },
    /// Nothing is pending.
    NoUpdate,
    /// Another session is already active.
    Busy,
}
