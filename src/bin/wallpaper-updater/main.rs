//! wallpaper-updater CLI entry point.

mod cli;

use clap::Parser;
use cli::{Cli, CliLogFormat, Mode};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wallpaper_updater::{SystemPlatform, UpdateController, UpdateEvent, UpdateOutcome};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let cli = Cli::parse();
    let log_format = cli.log_format;
    let mode = cli.mode();
    let config = cli.into_config()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    match log_format {
        CliLogFormat::Text => registry.with(fmt::layer()).init(),
        CliLogFormat::Json => registry.with(fmt::layer().json()).init(),
    }

    info!("wallpaper-updater v{}", env!("CARGO_PKG_VERSION"));

    let controller = Arc::new(UpdateController::new(config, Arc::new(SystemPlatform))?);
    info!("Running version {}", controller.current_version());

    match mode {
        Mode::CheckOnly => {
            controller.check_for_update().await;
            let status = controller.status();
            match status.latest_version {
                Some(latest) => println!("Update available: {} -> {latest}", status.current_version),
                None => println!("Up to date ({})", status.current_version),
            }
        }
        Mode::UpdateNow => {
            if !controller.check_for_update().await {
                println!("Up to date ({})", controller.current_version());
                return Ok(());
            }
            report(&controller.perform_update().await);
        }
        Mode::Run => run(controller).await,
    }

    info!("Goodbye!");
    Ok(())
}

async fn run(controller: Arc<UpdateController>) {
    let mut events = controller.subscribe_events();
    let log_events = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                UpdateEvent::UpdateAvailable { version } => info!("Update {} available", version),
                UpdateEvent::InstallDegraded { backup } => {
                    warn!("Previous bundle preserved at {}", backup.display());
                }
                other => info!("{:?}", other),
            }
        }
    });

    tokio::select! {
        () = controller.run() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for ctrl-c: {}", e);
            }
            info!("Received ctrl-c, shutting down");
            controller.shutdown();
        }
    }

    log_events.abort();
}

fn report(outcome: &UpdateOutcome) {
    match outcome {
        UpdateOutcome::Installed { version, bundle } => {
            println!("Installed {version} at {}", bundle.display());
        }
        UpdateOutcome::OpenedReleasePage => println!("Opened the release page"),
        UpdateOutcome::Failed { reason, degraded } => {
            println!("Update failed: {reason}");
            if *degraded {
                println!("The previous version was preserved next to the install path");
            }
        }
        UpdateOutcome::NoUpdate => println!("No update pending"),
        UpdateOutcome::Busy => println!("An update is already in progress"),
    }
}
