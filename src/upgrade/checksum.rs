//! SHA-256 verification of downloaded archives.
//!
//! Verification is opt-in. When enabled, a release must publish a
//! `<asset>.sha256` companion whose first token is the hex digest of the
//! archive, optionally prefixed with `sha256:`.

use sha2::{Digest, Sha256};
use std::path::Path;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

/// Length of a hex-encoded SHA-256 digest.
const DIGEST_HEX_LEN: usize = 64;

/// Errors from archive verification.
#[derive(Debug, Error)]
pub enum ChecksumError {
    /// The release carries no checksum asset.
    #[error("no checksum published for {0}")]
    Missing(String),

    /// The checksum asset does not hold a SHA-256 digest.
    #[error("malformed checksum: {0}")]
    Malformed(String),

    /// The archive does not match the published digest.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    Mismatch {
        /// Published digest.
        expected: String,
        /// Digest of the downloaded archive.
        actual: String,
    },

    /// The archive or checksum file could not be read.
    #[error("failed to read file for checksum: {0}")]
    Io(#[from] std::io::Error),
}

/// Computes and checks SHA-256 digests.
pub struct ChecksumVerifier;

impl ChecksumVerifier {
    /// Hex-encoded SHA-256 of a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub async fn compute_sha256(path: &Path) -> Result<String, ChecksumError> {
        debug!("Computing SHA-256 of {}", path.display());

        let mut file = fs::File::open(path).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        Ok(hex::encode(hasher.finalize()))
    }

    /// Extract the digest from the contents of a checksum asset.
    ///
    /// # Errors
    ///
    /// Returns [`ChecksumError::Malformed`] unless the first token is a
    /// 64-character hex string.
    pub fn parse_digest(content: &str) -> Result<String, ChecksumError> {
        let token = content
            .split_whitespace()
            .next()
            .ok_or_else(|| ChecksumError::Malformed("empty checksum file".to_string()))?;
        let digest = token.strip_prefix("sha256:").unwrap_or(token);

        if digest.len() != DIGEST_HEX_LEN || hex::decode(digest).is_err() {
            return Err(ChecksumError::Malformed(format!(
                "expected {DIGEST_HEX_LEN} hex characters, got '{digest}'"
            )));
        }

        Ok(digest.to_ascii_lowercase())
    }

    /// Verify `path` against an expected hex digest, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns [`ChecksumError::Mismatch`] if the digests differ.
    pub async fn verify(path: &Path, expected: &str) -> Result<(), ChecksumError> {
        let actual = Self::compute_sha256(path).await?;
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(ChecksumError::Mismatch {
                expected: expected.to_string(),
                actual,
            });
        }

        info!("Checksum verified for {}", path.display());
        Ok(())
    }

    /// Verify `archive` against a downloaded checksum file.
    ///
    /// # Errors
    ///
    /// Returns an error if the checksum file is unreadable or malformed, or if
    /// the archive does not match.
    pub async fn verify_from_file(archive: &Path, checksum_file: &Path) -> Result<(), ChecksumError> {
        let content = fs::read_to_string(checksum_file).await?;
        let expected = Self::parse_digest(&content)?;
        Self::verify(archive, &expected).await
    }
}
