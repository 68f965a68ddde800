//! State of a single update attempt.

use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

/// One update attempt and the private directory it writes into.
///
/// The working directory is created when the session starts and removed by
/// [`UpdateSession::cleanup`] or on drop, whichever comes first.
#[derive(Debug)]
pub struct UpdateSession {
    target_version: String,
    download_url: String,
    working_dir: Option<TempDir>,
    path: PathBuf,
}

impl UpdateSession {
    /// Start a session with a fresh unique directory under `work_root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn start(
        target_version: String,
        download_url: String,
        work_root: &Path,
    ) -> io::Result<Self> {
        std::fs::create_dir_all(work_root)?;
        let dir = tempfile::Builder::new()
            .prefix("wallpaper-update-")
            .tempdir_in(work_root)?;
        let path = dir.path().to_path_buf();
        debug!("Started update session for {} in {}", target_version, path.display());

        Ok(Self {
            target_version,
            download_url,
            working_dir: Some(dir),
            path,
        })
    }

    /// Version this session installs.
    #[must_use]
    pub fn target_version(&self) -> &str {
        &self.target_version
    }

    /// URL of the bundle archive.
    #[must_use]
    pub fn download_url(&self) -> &str {
        &self.download_url
    }

    /// The session's private directory.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.path
    }

    /// Where the downloaded archive is stored.
    #[must_use]
    pub fn archive_path(&self, asset_name: &str) -> PathBuf {
        self.path.join(asset_name)
    }

    /// Where the archive is unpacked.
    #[must_use]
    pub fn extract_dir(&self) -> PathBuf {
        self.path.join("extracted")
    }

    /// Remove the working directory.
    ///
    /// Best-effort and idempotent: a directory that is already gone is fine,
    /// and any other failure is logged and dropped.
    pub fn cleanup(&mut self) {
        let Some(dir) = self.working_dir.take() else {
            return;
        };
        match dir.close() {
            Ok(()) => debug!("Removed session directory {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove session directory {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

impl Drop for UpdateSession {
    fn drop(&mut self) {
        self.cleanup();
    }
}
