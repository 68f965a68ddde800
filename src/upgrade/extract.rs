//! Out-of-process archive extraction.
//!
//! Bundles carry extended attributes and resource forks that a plain zip
//! reader drops, which leaves an app Gatekeeper refuses to launch. Extraction
//! is therefore delegated to the system archive tool (`ditto -x -k`) running
//! as a child process.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Extension of an application bundle directory.
const BUNDLE_EXTENSION: &str = "app";

/// Errors from unpacking a release archive.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The archive tool could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The tool ran but the output is unusable.
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    /// The output directory could not be prepared or read.
    #[error("extraction I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Unpacks a downloaded archive with an external tool.
#[derive(Debug, Clone)]
pub struct ArchiveExtractor {
    program: PathBuf,
}

impl Default for ArchiveExtractor {
    fn default() -> Self {
        Self::new(PathBuf::from("/usr/bin/ditto"))
    }
}

impl ArchiveExtractor {
    /// Create an extractor that invokes `program -x -k <archive> <dir>`.
    #[must_use]
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }

    /// Get the extraction program.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Extract `archive` into `into` and return the single bundle it contains.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::ExtractionFailed`] if the tool exits non-zero or
    /// the output does not hold exactly one `.app` bundle.
    pub async fn extract(&self, archive: &Path, into: &Path) -> Result<PathBuf, ExtractError> {
        fs::create_dir_all(into).await?;

        info!(
            "Extracting {} into {} with {}",
            archive.display(),
            into.display(),
            self.program.display()
        );

        let output = Command::new(&self.program)
            .arg("-x")
            .arg("-k")
            .arg(archive)
            .arg(into)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ExtractError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("Extractor exited with {}: {}", output.status, stderr.trim());
            return Err(ExtractError::ExtractionFailed(format!(
                "{} exited with {}",
                self.program.display(),
                output.status
            )));
        }

        find_bundle(into).await
    }
}

/// Locate the only application bundle directly inside `dir`.
///
/// # Errors
///
/// Returns [`ExtractError::ExtractionFailed`] when there is no bundle or more
/// than one.
pub async fn find_bundle(dir: &Path) -> Result<PathBuf, ExtractError> {
    let mut bundles = Vec::new();
    let mut entries = fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_bundle = path.extension() == Some(OsStr::new(BUNDLE_EXTENSION))
            && entry.file_type().await?.is_dir();
        if is_bundle {
            debug!("Found bundle candidate: {}", path.display());
            bundles.push(path);
        }
    }

    match bundles.len() {
        1 => Ok(bundles.remove(0)),
        0 => Err(ExtractError::ExtractionFailed(format!(
            "no application bundle in {}",
            dir.display()
        ))),
        n => Err(ExtractError::ExtractionFailed(format!(
            "{n} application bundles in {}, expected one",
            dir.display()
        ))),
    }
}
