//! Bundle replacement with rollback.
//!
//! There is no single call that swaps one directory tree for another, so the
//! swap is two renames:
//!
//! 1. move the installed bundle aside to `<bundle>.old`
//! 2. move the new bundle into the freed slot
//!
//! If step 2 fails the backup is renamed back. The install slot is never
//! written while something else occupies it, and every step after the first
//! has an undo. The only unrecoverable outcome is a failed undo, which is
//! reported as [`ReplaceError::Degraded`] so the caller can send the user to a
//! manual reinstall instead of retrying.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Suffix of the transient backup bundle.
const BACKUP_SUFFIX: &str = ".old";

/// Errors from replacing the installed bundle.
#[derive(Debug, Error)]
pub enum ReplaceError {
    /// The install directory is not writable; nothing was touched.
    #[error("no write permission for {}", .dir.display())]
    NoWritePermission {
        /// Directory that holds the installed bundle.
        dir: PathBuf,
    },

    /// Moving the installed bundle aside failed; the install is untouched.
    #[error("failed to move installed bundle aside: {source}")]
    BackupFailed {
        /// Underlying error.
        source: io::Error,
    },

    /// Moving the new bundle in failed; the original bundle was restored.
    #[error("failed to install new bundle, original restored: {source}")]
    ReplaceFailed {
        /// Underlying error.
        source: io::Error,
    },

    /// Moving the new bundle in failed and restoring the original also failed.
    #[error(
        "failed to install new bundle ({replace_error}) and to restore the original ({rollback_error}); previous bundle left at {}",
        .backup.display()
    )]
    Degraded {
        /// Where the previous bundle was left.
        backup: PathBuf,
        /// Why the new bundle could not be moved in.
        replace_error: io::Error,
        /// Why the backup could not be moved back.
        rollback_error: io::Error,
    },
}

impl ReplaceError {
    /// Whether the install slot was left empty with only the backup on disk.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

/// File-system operations used by the swap.
pub trait FileOps: Send + Sync {
    /// Rename `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Remove a file or directory tree.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error, including `NotFound`.
    fn remove_all(&self, path: &Path) -> io::Result<()>;

    /// Whether the current user can create entries in `dir`.
    fn is_dir_writable(&self, dir: &Path) -> bool;
}

/// [`FileOps`] on the local file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileOps;

impl FileOps for LocalFileOps {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::rename(from, to)
    }

    fn remove_all(&self, path: &Path) -> io::Result<()> {
        if std::fs::symlink_metadata(path)?.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        }
    }

    #[cfg(unix)]
    fn is_dir_writable(&self, dir: &Path) -> bool {
        // Must not create anything in `dir`
        rustix::fs::access(dir, rustix::fs::Access::WRITE_OK).is_ok()
    }

    #[cfg(not(unix))]
    fn is_dir_writable(&self, dir: &Path) -> bool {
        std::fs::metadata(dir).is_ok_and(|m| m.is_dir() && !m.permissions().readonly())
    }
}

impl<T: FileOps + ?Sized> FileOps for std::sync::Arc<T> {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        (**self).rename(from, to)
    }

    fn remove_all(&self, path: &Path) -> io::Result<()> {
        (**self).remove_all(path)
    }

    fn is_dir_writable(&self, dir: &Path) -> bool {
        (**self).is_dir_writable(dir)
    }
}

/// Backup location for an installed bundle: `<bundle>.old`.
#[must_use]
pub fn backup_path(installed: &Path) -> PathBuf {
    let mut name = installed
        .file_name()
        .map_or_else(OsString::new, OsString::from);
    name.push(BACKUP_SUFFIX);
    installed.with_file_name(name)
}

/// Swaps the installed bundle for a freshly extracted one.
#[derive(Debug, Clone, Default)]
pub struct InstallReplacer<F = LocalFileOps> {
    fs: F,
}

impl InstallReplacer<LocalFileOps> {
    /// Create a replacer on the local file system.
    #[must_use]
    pub fn new() -> Self {
        Self::with_file_ops(LocalFileOps)
    }
}

impl<F: FileOps> InstallReplacer<F> {
    /// Create a replacer over custom file-system operations.
    #[must_use]
    pub fn with_file_ops(fs: F) -> Self {
        Self { fs }
    }

    /// Replace the bundle at `installed` with the one at `staged`.
    ///
    /// Runs without suspension points; callers on an async runtime should
    /// move it to a blocking thread so it always runs to completion.
    ///
    /// # Errors
    ///
    /// See [`ReplaceError`]. On every error except
    /// [`ReplaceError::Degraded`] a bundle occupies `installed` afterwards.
    pub fn replace(&self, installed: &Path, staged: &Path) -> Result<(), ReplaceError> {
        let parent = match installed.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        if !self.fs.is_dir_writable(parent) {
            warn!("Install directory {} is not writable", parent.display());
            return Err(ReplaceError::NoWritePermission {
                dir: parent.to_path_buf(),
            });
        }

        let backup = backup_path(installed);
        self.discard(&backup, "stale backup");

        debug!("Moving {} to {}", installed.display(), backup.display());
        self.fs
            .rename(installed, &backup)
            .map_err(|source| ReplaceError::BackupFailed { source })?;

        debug!("Moving {} to {}", staged.display(), installed.display());
        if let Err(replace_error) = self.fs.rename(staged, installed) {
            warn!("Installing new bundle failed: {}; rolling back", replace_error);
            return match self.fs.rename(&backup, installed) {
                Ok(()) => {
                    info!("Restored original bundle at {}", installed.display());
                    Err(ReplaceError::ReplaceFailed {
                        source: replace_error,
                    })
                }
                Err(rollback_error) => {
                    error!(
                        backup = %backup.display(),
                        install = %installed.display(),
                        "Install degraded: replace failed ({}) and rollback failed ({}); manual reinstall required",
                        replace_error,
                        rollback_error
                    );
                    Err(ReplaceError::Degraded {
                        backup,
                        replace_error,
                        rollback_error,
                    })
                }
            };
        }

        info!("Installed new bundle at {}", installed.display());
        self.discard(&backup, "backup");
        Ok(())
    }

    /// Best-effort removal; failure here never changes the swap result.
    fn discard(&self, path: &Path, what: &str) {
        match self.fs.remove_all(path) {
            Ok(()) => debug!("Removed {} at {}", what, path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {} at {}: {}", what, path.display(), e),
        }
    }
}
