//! Update controller: periodic checks and the update state machine.
//!
//! ```text
//! Idle -> Downloading(0.0..=1.0) -> Installing -> Idle (relaunch, process exits)
//!                 |                     |
//!                 +------> Failed <-----+ -> cleanup, wait, open release page -> Idle
//! ```
//!
//! The controller is the only owner of session state. A session is claimed by
//! atomically moving the published state from `Idle` to `Downloading`, so any
//! number of timer ticks, wake-ups or user triggers collapse into at most one
//! active session. The claim is released back to `Idle` when the session ends,
//! including when the caller drops the future. Once the swap has started, the
//! claim and the working directory belong to the blocking swap task and are
//! only released after both renames have returned.

use crate::config::UpdaterConfig;
use crate::error::{Error, Result};
use crate::event::{create_event_channel, UpdateEvent, UpdateEventsChannel, UpdateEventsSender};
use crate::upgrade::checksum::{ChecksumError, ChecksumVerifier};
use crate::upgrade::download::ArtifactDownloader;
use crate::upgrade::extract::ArchiveExtractor;
use crate::upgrade::monitor::ReleaseFeedClient;
use crate::upgrade::platform::Platform;
use crate::upgrade::replace::{FileOps, InstallReplacer, LocalFileOps, ReplaceError};
use crate::upgrade::session::UpdateSession;
use crate::upgrade::version::current_version;
use crate::upgrade::{UpdateInfo, UpdateOutcome, UpdateState, UpdateStatus};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Message shown to the user for any failed session.
const FAILURE_MESSAGE: &str = "Update failed";

/// Message shown when the new bundle is installed but could not be started.
const RESTART_MESSAGE: &str = "Restart to finish updating";

/// Holds the single session slot; puts the state back to `Idle` on drop.
struct SessionClaim {
    state: Arc<watch::Sender<UpdateState>>,
}

impl SessionClaim {
    /// Move `Idle` to `Downloading`, or return `None` if a session is active.
    fn acquire(state: &Arc<watch::Sender<UpdateState>>) -> Option<Self> {
        let claimed = state.send_if_modified(|current| {
            if current.is_idle() {
                *current = UpdateState::Downloading { progress: 0.0 };
                true
            } else {
                false
            }
        });
        claimed.then(|| Self {
            state: Arc::clone(state),
        })
    }
}

impl Drop for SessionClaim {
    fn drop(&mut self) {
        self.state.send_if_modified(|current| {
            if current.is_idle() {
                false
            } else {
                *current = UpdateState::Idle;
                true
            }
        });
    }
}

/// Drives release checks and update sessions.
pub struct UpdateController {
    config: UpdaterConfig,
    feed: ReleaseFeedClient,
    downloader: ArtifactDownloader,
    extractor: ArchiveExtractor,
    replacer: InstallReplacer<Arc<dyn FileOps>>,
    platform: Arc<dyn Platform>,
    install_path: Option<PathBuf>,
    work_root: PathBuf,
    current_version: String,
    pending: Mutex<Option<UpdateInfo>>,
    last_checked: Mutex<Option<DateTime<Utc>>>,
    state_tx: Arc<watch::Sender<UpdateState>>,
    events_tx: UpdateEventsSender,
    wake: Notify,
    shutdown_tx: watch::Sender<bool>,
}

impl UpdateController {
    /// Create a controller.
    ///
    /// The install path comes from the configuration, or else from the bundle
    /// the process runs in. Without either, updates fall back to the release page.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP clients
    /// cannot be built.
    pub fn new(config: UpdaterConfig, platform: Arc<dyn Platform>) -> Result<Self> {
        config.validate()?;

        let current_version = current_version(config.current_version.as_deref());
        let feed = ReleaseFeedClient::new(
            config.feed_url.clone(),
            config.asset_name(),
            current_version.clone(),
            config.request_timeout(),
        )?;
        let downloader = ArtifactDownloader::new(config.request_timeout())?;
        let extractor = ArchiveExtractor::new(config.extractor.clone());
        let install_path = config
            .install_path
            .clone()
            .or_else(|| platform.running_bundle());

        match &install_path {
            Some(path) => info!("Install path: {}", path.display()),
            None => info!("Not running from an app bundle; updates open the release page"),
        }

        let (state_tx, _) = watch::channel(UpdateState::Idle);
        let file_ops: Arc<dyn FileOps> = Arc::new(LocalFileOps);
        let (events_tx, _) = create_event_channel();
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            feed,
            downloader,
            extractor,
            replacer: InstallReplacer::with_file_ops(file_ops),
            platform,
            install_path,
            work_root: std::env::temp_dir(),
            current_version,
            pending: Mutex::new(None),
            last_checked: Mutex::new(None),
            state_tx: Arc::new(state_tx),
            events_tx,
            wake: Notify::new(),
            shutdown_tx,
        })
    }

    /// Create session directories under `root` instead of the system temp dir.
    #[must_use]
    pub fn with_work_root(mut self, root: PathBuf) -> Self {
        self.work_root = root;
        self
    }

    /// Swap bundles through `file_ops` instead of the local file system.
    #[must_use]
    pub fn with_file_ops(mut self, file_ops: Arc<dyn FileOps>) -> Self {
        self.replacer = InstallReplacer::with_file_ops(file_ops);
        self
    }

    /// Current session state.
    #[must_use]
    pub fn state(&self) -> UpdateState {
        self.state_tx.borrow().clone()
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<UpdateState> {
        self.state_tx.subscribe()
    }

    /// Subscribe to update events.
    #[must_use]
    pub fn subscribe_events(&self) -> UpdateEventsChannel {
        self.events_tx.subscribe()
    }

    /// Receiver that flips to `true` once the process should exit.
    #[must_use]
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Stop the run loop.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Ask the run loop to check now. Repeated calls coalesce.
    pub fn trigger(&self) {
        self.wake.notify_one();
    }

    /// Whether the last check found a newer release.
    #[must_use]
    pub fn is_update_available(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// The pending update, if any.
    #[must_use]
    pub fn pending_update(&self) -> Option<UpdateInfo> {
        self.pending.lock().clone()
    }

    /// Path of the installed bundle, if known.
    #[must_use]
    pub fn install_path(&self) -> Option<&Path> {
        self.install_path.as_deref()
    }

    /// Version of the running app.
    #[must_use]
    pub fn current_version(&self) -> &str {
        &self.current_version
    }

    /// Snapshot of everything the controller knows.
    #[must_use]
    pub fn status(&self) -> UpdateStatus {
        let pending = self.pending.lock().clone();
        UpdateStatus {
            current_version: self.current_version.clone(),
            latest_version: pending.as_ref().map(|p| p.version.clone()),
            update_available: pending.is_some(),
            last_checked: *self.last_checked.lock(),
            state: self.state(),
        }
    }

    /// Check the feed once and record whether an update is available.
    ///
    /// Never fails: feed errors are logged at debug level and leave the
    /// previous result in place. While a session is active this is a no-op.
    pub async fn check_for_update(&self) -> bool {
        if !self.state_tx.borrow().is_idle() {
            debug!("Update session active, skipping check");
            return self.is_update_available();
        }

        match self.feed.check_for_updates().await {
            Ok(Some(info)) => {
                *self.last_checked.lock() = Some(Utc::now());
                let version = info.version.clone();
                let previous = self.pending.lock().replace(info);
                if previous.map(|p| p.version) != Some(version.clone()) {
                    let _ = self.events_tx.send(UpdateEvent::UpdateAvailable { version });
                }
                true
            }
            Ok(None) => {
                *self.last_checked.lock() = Some(Utc::now());
                if self.pending.lock().take().is_some() {
                    let _ = self.events_tx.send(UpdateEvent::UpdateCleared);
                }
                false
            }
            Err(e) => {
                debug!("Update check skipped: {}", e);
                self.is_update_available()
            }
        }
    }

    /// Install the pending update.
    ///
    /// Falls back to opening the release page when there is no bundle asset or
    /// no known install path. On success the new bundle is relaunched and
    /// shutdown is signalled.
    pub async fn perform_update(&self) -> UpdateOutcome {
        let Some(info) = self.pending_update() else {
            debug!("No pending update");
            return UpdateOutcome::NoUpdate;
        };

        let (Some(download_url), Some(install_path)) =
            (info.download_url.clone(), self.install_path.clone())
        else {
            info!("In-place update not possible; opening release page");
            self.open_release_page(&info.release_page);
            return UpdateOutcome::OpenedReleasePage;
        };

        let Some(claim) = SessionClaim::acquire(&self.state_tx) else {
            debug!("Update session already active");
            return UpdateOutcome::Busy;
        };

        info!("Updating {} -> {}", self.current_version, info.version);
        let _ = self.events_tx.send(UpdateEvent::UpdateStarted {
            version: info.version.clone(),
        });

        let session =
            match UpdateSession::start(info.version.clone(), download_url, &self.work_root) {
                Ok(session) => session,
                Err(e) => return self.fail(None, Error::Io(e), &info).await,
            };

        let bundle = match self.prepare(&session, &info).await {
            Ok(bundle) => bundle,
            Err(e) => return self.fail(Some(session), e, &info).await,
        };

        let (result, active) = self.swap(session, claim, bundle, &install_path).await;
        let Some((mut session, _claim)) = active else {
            // The swap task died; it released the claim and the working directory
            let reason = result.err().map(|e| e.to_string()).unwrap_or_default();
            error!("Bundle swap aborted: {}", reason);
            return UpdateOutcome::Failed {
                reason,
                degraded: false,
            };
        };
        if let Err(e) = result {
            return self.fail(Some(session), e, &info).await;
        }
        session.cleanup();
        self.pending.lock().take();

        if let Err(e) = self.platform.relaunch(&install_path) {
            error!("Update installed but relaunch failed: {}", e);
            let _ = self.events_tx.send(UpdateEvent::Failed {
                message: RESTART_MESSAGE.to_string(),
            });
            self.state_tx.send_replace(UpdateState::Idle);
            return UpdateOutcome::Failed {
                reason: Error::Relaunch(e.to_string()).to_string(),
                degraded: false,
            };
        }

        info!("Update to {} installed; shutting down", info.version);
        self.state_tx.send_replace(UpdateState::Idle);
        let _ = self.events_tx.send(UpdateEvent::RestartRequired {
            bundle: install_path.clone(),
        });
        self.shutdown();
        UpdateOutcome::Installed {
            version: info.version,
            bundle: install_path,
        }
    }

    /// Download, verify and unpack the release; returns the staged bundle.
    async fn prepare(&self, session: &UpdateSession, info: &UpdateInfo) -> Result<PathBuf> {
        let asset_name = self.config.asset_name();
        let archive = session.archive_path(&asset_name);

        self.downloader
            .download(session.download_url(), &archive, |progress| {
                self.state_tx
                    .send_replace(UpdateState::Downloading { progress });
            })
            .await?;

        if self.config.verify_checksum {
            let checksum_url = info
                .checksum_url
                .as_deref()
                .ok_or_else(|| ChecksumError::Missing(asset_name.clone()))?;
            let checksum_file = session.archive_path(&format!("{asset_name}.sha256"));
            self.downloader
                .download(checksum_url, &checksum_file, |_| {})
                .await?;
            ChecksumVerifier::verify_from_file(&archive, &checksum_file).await?;
        }

        self.state_tx.send_replace(UpdateState::Installing);
        let bundle = self
            .extractor
            .extract(&archive, &session.extract_dir())
            .await?;
        Ok(bundle)
    }

    /// Swap `bundle` into `install_path` on a blocking thread.
    ///
    /// The session and the claim move into the task and come back with the
    /// result. If this future is dropped they are released on the blocking
    /// thread after the renames, never while `bundle` is being moved out of the
    /// working directory.
    async fn swap(
        &self,
        session: UpdateSession,
        claim: SessionClaim,
        bundle: PathBuf,
        install_path: &Path,
    ) -> (Result<()>, Option<(UpdateSession, SessionClaim)>) {
        let replacer = self.replacer.clone();
        let installed = install_path.to_path_buf();
        let task = tokio::task::spawn_blocking(move || {
            let result = replacer.replace(&installed, &bundle);
            (result, session, claim)
        });

        match task.await {
            Ok((result, session, claim)) => (result.map_err(Error::from), Some((session, claim))),
            Err(e) => (Err(Error::Io(std::io::Error::other(e))), None),
        }
    }

    async fn fail(
        &self,
        session: Option<UpdateSession>,
        error: Error,
        info: &UpdateInfo,
    ) -> UpdateOutcome {
        let degraded = error.is_degraded();
        if let Error::Replace(ReplaceError::Degraded { backup, .. }) = &error {
            error!(
                backup = %backup.display(),
                "Update to {} left the install degraded: {}",
                info.version,
                error
            );
            let _ = self.events_tx.send(UpdateEvent::InstallDegraded {
                backup: backup.clone(),
            });
        } else {
            warn!("Update to {} failed: {}", info.version, error);
        }

        self.state_tx.send_replace(UpdateState::Failed {
            message: FAILURE_MESSAGE.to_string(),
        });
        let _ = self.events_tx.send(UpdateEvent::Failed {
            message: FAILURE_MESSAGE.to_string(),
        });

        if let Some(mut session) = session {
            session.cleanup();
        }

        tokio::time::sleep(self.config.failure_reset_delay()).await;
        self.open_release_page(&info.release_page);
        self.state_tx.send_replace(UpdateState::Idle);

        UpdateOutcome::Failed {
            reason: error.to_string(),
            degraded,
        }
    }

    fn open_release_page(&self, url: &str) {
        if url.is_empty() {
            return;
        }
        if let Err(e) = self.platform.open_url(url) {
            warn!("Failed to open release page {}: {}", url, e);
        }
    }

    /// One check, followed by an install when `auto_install` is set.
    pub async fn run_cycle(&self) {
        if self.check_for_update().await && self.config.auto_install {
            let outcome = self.perform_update().await;
            debug!("Automatic update finished: {:?}", outcome);
        }
    }

    /// Check immediately, then on every interval tick or trigger, until shutdown.
    pub async fn run(&self) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut ticker = tokio::time::interval(self.config.check_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Checking for updates every {}h",
            self.config.check_interval_hours
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = shutdown.changed() => {}
                _ = ticker.tick() => self.run_cycle().await,
                () = self.wake.notified() => self.run_cycle().await,
            }
        }

        info!("Update controller stopped");
    }
}
