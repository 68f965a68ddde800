//! Update event system.

use std::path::PathBuf;
use tokio::sync::broadcast;

/// Events emitted by the update controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    /// A check found a strictly newer release.
    UpdateAvailable {
        /// New version, without the leading `v`.
        version: String,
    },

    /// A check found nothing newer; any earlier availability is cleared.
    UpdateCleared,

    /// An update session started downloading.
    UpdateStarted {
        /// Version being installed.
        version: String,
    },

    /// The new bundle is in place and was relaunched; this process should exit.
    RestartRequired {
        /// Path of the freshly installed bundle.
        bundle: PathBuf,
    },

    /// Rollback failed and only the backup bundle remains on disk.
    InstallDegraded {
        /// Where the previous bundle was left.
        backup: PathBuf,
    },

    /// An update session failed.
    Failed {
        /// User-facing failure message.
        message: String,
    },
}

/// Channel for receiving update events.
pub type UpdateEventsChannel = broadcast::Receiver<UpdateEvent>;

/// Sender for update events.
pub type UpdateEventsSender = broadcast::Sender<UpdateEvent>;

/// Create a new event channel pair.
#[must_use]
pub fn create_event_channel() -> (UpdateEventsSender, UpdateEventsChannel) {
    broadcast::channel(64)
}
