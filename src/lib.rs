//! Self-update engine for the Wallpaper menu-bar app.
//!
//! The app periodically checks a GitHub-style release feed, downloads the
//! `Wallpaper.app.zip` asset of a newer release, unpacks it out of process and
//! swaps the running bundle for the new one. The swap is built from two renames
//! with a rollback path, so every failure ends with a launchable install or an
//! explicit degraded signal that points the user at a manual download.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wallpaper_updater::{SystemPlatform, UpdateController, UpdaterConfig};
//!
//! #[tokio::main]
//! async fn main() -> wallpaper_updater::Result<()> {
//!     let controller = UpdateController::new(UpdaterConfig::default(), Arc::new(SystemPlatform))?;
//!     if controller.check_for_update().await {
//!         controller.perform_update().await;
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod upgrade;

pub use config::UpdaterConfig;
pub use error::{Error, Result};
pub use event::{UpdateEvent, UpdateEventsChannel, UpdateEventsSender};
pub use upgrade::{
    is_newer, normalize_tag, ArchiveExtractor, ArtifactDownloader, InstallReplacer, Platform,
    ReleaseFeedClient, ReleaseMetadata, SystemPlatform, UpdateController, UpdateOutcome,
    UpdateState, UpdateStatus,
};
