//! Configuration for wallpaper-updater.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Updater configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Latest-release endpoint of the release feed.
    #[serde(default = "default_feed_url")]
    pub feed_url: String,

    /// Bundle name; the expected asset is `<app_name>.app.zip`.
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Check interval in hours.
    #[serde(default = "default_check_interval")]
    pub check_interval_hours: u64,

    /// Install an available update without waiting for a user trigger.
    #[serde(default)]
    pub auto_install: bool,

    /// Explicit path of the installed bundle.
    #[serde(default)]
    pub install_path: Option<PathBuf>,

    /// Override for the running version.
    #[serde(default)]
    pub current_version: Option<String>,

    /// Seconds spent in the failed state before falling back to the release page.
    #[serde(default = "default_failure_reset")]
    pub failure_reset_secs: u64,

    /// Program used to unpack the downloaded archive.
    #[serde(default = "default_extractor")]
    pub extractor: PathBuf,

    /// Timeout for the release feed request, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Require a `.sha256` companion asset and verify the archive against it.
    #[serde(default)]
    pub verify_checksum: bool,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            feed_url: default_feed_url(),
            app_name: default_app_name(),
            check_interval_hours: default_check_interval(),
            auto_install: false,
            install_path: None,
            current_version: None,
            failure_reset_secs: default_failure_reset(),
            extractor: default_extractor(),
            request_timeout_secs: default_request_timeout(),
            verify_checksum: false,
            log_level: default_log_level(),
        }
    }
}

fn default_feed_url() -> String {
    "https://api.github.com/repos/colachg/wallpaper/releases/latest".to_string()
}

fn default_app_name() -> String {
    "Wallpaper".to_string()
}

const fn default_check_interval() -> u64 {
    24
}

const fn default_failure_reset() -> u64 {
    2
}

fn default_extractor() -> PathBuf {
    PathBuf::from("/usr/bin/ditto")
}

const fn default_request_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Default location of the configuration file.
#[must_use]
pub fn default_config_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "wallpaper")
        .map(|dirs| dirs.config_dir().join("updater.toml"))
        .unwrap_or_else(|| PathBuf::from("updater.toml"))
}

impl UpdaterConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &Path) -> crate::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check invariants that serde defaults cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] for an empty app name, an empty feed URL
    /// or a zero check interval.
    pub fn validate(&self) -> crate::Result<()> {
        if self.app_name.trim().is_empty() {
            return Err(crate::Error::Config("app_name must not be empty".to_string()));
        }
        if self.feed_url.trim().is_empty() {
            return Err(crate::Error::Config("feed_url must not be empty".to_string()));
        }
        if self.check_interval_hours == 0 {
            return Err(crate::Error::Config(
                "check_interval_hours must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Name of the release asset that carries the app bundle.
    #[must_use]
    pub fn asset_name(&self) -> String {
        format!("{}.app.zip", self.app_name)
    }

    /// Interval between periodic checks.
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_hours.saturating_mul(3600))
    }

    /// Delay spent in the failed state.
    #[must_use]
    pub fn failure_reset_delay(&self) -> Duration {
        Duration::from_secs(self.failure_reset_secs)
    }

    /// Timeout for the release feed request.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
