//! Release feed client for auto-updates.

use crate::upgrade::version::{is_newer, normalize_tag};
use crate::upgrade::UpdateInfo;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CACHE_CONTROL, PRAGMA};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Media type selecting the structured JSON representation of the feed.
const FEED_MEDIA_TYPE: &str = "application/vnd.github+json";

/// Errors from a release feed check.
///
/// Callers treat every variant as "no update this cycle".
#[derive(Debug, Error)]
pub enum FeedError {
    /// The HTTP request could not be sent or completed.
    #[error("release feed request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The feed answered with a non-success status.
    #[error("release feed returned HTTP {0}")]
    Status(StatusCode),

    /// The feed body was not a release document.
    #[error("release feed body could not be decoded: {0}")]
    Decode(String),
}

/// A downloadable file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    /// File name of the asset.
    pub name: String,
    /// Direct download URL.
    #[serde(rename = "browser_download_url")]
    pub download_url: String,
}

/// Latest-release descriptor read from the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseMetadata {
    /// Release tag, e.g. `v1.2.3`.
    pub tag_name: String,
    /// Human-facing release page.
    #[serde(rename = "html_url")]
    pub release_page_url: String,
    /// Attached assets, in feed order.
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

impl ReleaseMetadata {
    /// Release version with the leading `v` stripped.
    #[must_use]
    pub fn version(&self) -> &str {
        normalize_tag(&self.tag_name)
    }

    /// Find an asset by exact file name.
    #[must_use]
    pub fn find_asset(&self, name: &str) -> Option<&ReleaseAsset> {
        self.assets.iter().find(|asset| asset.name == name)
    }

    /// Build the pending update for this release, looking up the bundle
    /// archive and its optional `.sha256` companion.
    #[must_use]
    pub fn to_update_info(&self, asset_name: &str) -> UpdateInfo {
        let checksum_name = format!("{asset_name}.sha256");
        UpdateInfo {
            version: self.version().to_string(),
            release_page: self.release_page_url.clone(),
            download_url: self.find_asset(asset_name).map(|a| a.download_url.clone()),
            checksum_url: self
                .find_asset(&checksum_name)
                .map(|a| a.download_url.clone()),
        }
    }
}

/// Reads the latest release from the feed and compares it with the running version.
pub struct ReleaseFeedClient {
    client: reqwest::Client,
    feed_url: String,
    asset_name: String,
    current_version: String,
}

impl ReleaseFeedClient {
    /// Create a feed client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        feed_url: String,
        asset_name: String,
        current_version: String,
        timeout: Duration,
    ) -> Result<Self, FeedError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(FEED_MEDIA_TYPE));
        // Never answer a check from a cached response
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));

        let client = reqwest::Client::builder()
            .user_agent(concat!("wallpaper-updater/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            feed_url,
            asset_name,
            current_version,
        })
    }

    /// Fetch the latest release document.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, a non-success status or an
    /// undecodable body.
    pub async fn fetch_latest_release(&self) -> Result<ReleaseMetadata, FeedError> {
        debug!("Fetching latest release from {}", self.feed_url);

        let response = self.client.get(&self.feed_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status(status));
        }

        response
            .json::<ReleaseMetadata>()
            .await
            .map_err(|e| FeedError::Decode(e.to_string()))
    }

    /// Check the feed for a strictly newer release.
    ///
    /// # Errors
    ///
    /// Returns an error if the feed cannot be read; see [`FeedError`].
    pub async fn check_for_updates(&self) -> Result<Option<UpdateInfo>, FeedError> {
        let release = self.fetch_latest_release().await?;
        let remote = release.version();

        if !is_newer(remote, &self.current_version) {
            debug!(
                "No update: latest {} is not newer than {}",
                remote, self.current_version
            );
            return Ok(None);
        }

        let info = release.to_update_info(&self.asset_name);
        info!(
            "Update available: {} -> {} (asset {})",
            self.current_version,
            info.version,
            if info.download_url.is_some() {
                "found"
            } else {
                "missing"
            }
        );
        Ok(Some(info))
    }

    /// Get the running version this client compares against.
    #[must_use]
    pub fn current_version(&self) -> &str {
        &self.current_version
    }

    /// Get the feed endpoint.
    #[must_use]
    pub fn feed_url(&self) -> &str {
        &self.feed_url
    }
}
