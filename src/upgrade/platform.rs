//! Host operations the updater delegates to the OS.

use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Launcher used to start a new, independent app instance.
const LAUNCHER: &str = "/usr/bin/open";

/// OS services needed around an update.
pub trait Platform: Send + Sync {
    /// Start a new instance of the app at `bundle`, detached from this process.
    ///
    /// # Errors
    ///
    /// Returns an error if the launcher cannot be started.
    fn relaunch(&self, bundle: &Path) -> io::Result<()>;

    /// Open `url` in the user's browser.
    ///
    /// # Errors
    ///
    /// Returns an error if no handler could be started.
    fn open_url(&self, url: &str) -> io::Result<()>;

    /// Bundle the current process runs from, if any.
    fn running_bundle(&self) -> Option<PathBuf> {
        std::env::current_exe()
            .ok()
            .and_then(|exe| bundle_from_exe(&exe))
    }
}

/// [`Platform`] backed by the real OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPlatform;

impl Platform for SystemPlatform {
    fn relaunch(&self, bundle: &Path) -> io::Result<()> {
        info!("Relaunching {}", bundle.display());
        // `open -n` hands the new instance to the launch service, so it
        // outlives this process
        Command::new(LAUNCHER)
            .arg("-n")
            .arg(bundle)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(drop)
    }

    fn open_url(&self, url: &str) -> io::Result<()> {
        debug!("Opening {}", url);
        open::that_detached(url)
    }
}

/// Find the enclosing `.app` directory of an executable.
///
/// `/Applications/Wallpaper.app/Contents/MacOS/Wallpaper` yields
/// `/Applications/Wallpaper.app`; an executable outside a bundle yields `None`.
#[must_use]
pub fn bundle_from_exe(exe: &Path) -> Option<PathBuf> {
    exe.ancestors()
        .skip(1)
        .find(|p| p.extension() == Some(OsStr::new("app")))
        .map(Path::to_path_buf)
}
