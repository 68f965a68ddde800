//! Command-line interface definition.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use wallpaper_updater::config::{default_config_path, UpdaterConfig};

/// Keeps the Wallpaper menu-bar app up to date.
#[derive(Parser, Debug)]
#[command(name = "wallpaper-updater")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Latest-release endpoint of the release feed.
    #[arg(long, env = "WALLPAPER_FEED_URL")]
    pub feed_url: Option<String>,

    /// Path of the installed bundle (defaults to the bundle this binary runs from).
    #[arg(long, env = "WALLPAPER_INSTALL_PATH")]
    pub install_path: Option<PathBuf>,

    /// Hours between release checks.
    #[arg(long, env = "WALLPAPER_CHECK_INTERVAL_HOURS")]
    pub check_interval_hours: Option<u64>,

    /// Install updates as soon as they are found.
    #[arg(long, env = "WALLPAPER_AUTO_INSTALL")]
    pub auto_install: bool,

    /// Require and verify a `.sha256` companion asset.
    #[arg(long, env = "WALLPAPER_VERIFY_CHECKSUM")]
    pub verify_checksum: bool,

    /// Check once, report, and exit.
    #[arg(long, conflicts_with = "update_now")]
    pub check_only: bool,

    /// Check once and install a newer release immediately.
    #[arg(long)]
    pub update_now: bool,

    /// Log level.
    #[arg(long, env = "RUST_LOG")]
    pub log_level: Option<String>,

    /// Log output format.
    #[arg(long, value_enum, default_value = "text", env = "WALLPAPER_LOG_FORMAT")]
    pub log_format: CliLogFormat,

    /// Path to configuration file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}

/// Log format CLI enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliLogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// What the binary does after start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Periodic checks until shutdown.
    Run,
    /// A single check.
    CheckOnly,
    /// A single check followed by an install.
    UpdateNow,
}

impl Cli {
    /// Selected mode.
    pub fn mode(&self) -> Mode {
        if self.check_only {
            Mode::CheckOnly
        } else if self.update_now {
            Mode::UpdateNow
        } else {
            Mode::Run
        }
    }

    /// Convert CLI arguments into an `UpdaterConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file is specified but cannot be loaded.
    pub fn into_config(self) -> color_eyre::Result<UpdaterConfig> {
        // An explicit path must exist; the default one is optional
        let mut config = if let Some(ref path) = self.config {
            UpdaterConfig::from_file(path)?
        } else {
            let path = default_config_path();
            if path.exists() {
                UpdaterConfig::from_file(&path)?
            } else {
                UpdaterConfig::default()
            }
        };

        if let Some(feed_url) = self.feed_url {
            config.feed_url = feed_url;
        }
        if let Some(install_path) = self.install_path {
            config.install_path = Some(install_path);
        }
        if let Some(hours) = self.check_interval_hours {
            config.check_interval_hours = hours;
        }
        if let Some(log_level) = self.log_level {
            config.log_level = log_level;
        }
        config.auto_install |= self.auto_install;
        config.verify_checksum |= self.verify_checksum;

        config.validate()?;
        Ok(config)
    }
}
