//! Update sessions against the fake release host.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use super::harness::{LockedInstallSlot, ReleaseFixture, UpdateHarness, ASSET, OLD_PAYLOAD};
use axum::http::StatusCode;
use sha2::{Digest, Sha256};
use std::os::unix::fs::PermissionsExt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;
use wallpaper_updater::upgrade::{FileOps, LocalFileOps};
use wallpaper_updater::{UpdateEvent, UpdateEventsChannel, UpdateOutcome, UpdateState};

const NEW_PAYLOAD: &[u8] = b"new bundle 9.9.9";

fn drain(events: &mut UpdateEventsChannel) -> Vec<UpdateEvent> {
    let mut seen = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => seen.push(event),
            Err(TryRecvError::Lagged(_)) => {}
            Err(_) => return seen,
        }
    }
}

fn rank(state: &UpdateState) -> u8 {
    match state {
        UpdateState::Idle => 0,
        UpdateState::Downloading { .. } => 1,
        UpdateState::Installing => 2,
        UpdateState::Failed { .. } => 3,
    }
}

/// A full session replaces the bundle, cleans up and relaunches.
#[tokio::test]
async fn test_update_installs_new_bundle() {
    let harness = UpdateHarness::start(ReleaseFixture::newer(NEW_PAYLOAD)).await;
    let controller = &harness.controller;
    let mut events = controller.subscribe_events();

    assert!(controller.check_for_update().await);
    let outcome = controller.perform_update().await;

    assert_eq!(
        outcome,
        UpdateOutcome::Installed {
            version: "9.9.9".to_string(),
            bundle: harness.install_path(),
        }
    );
    assert_eq!(harness.installed_payload().as_bytes(), NEW_PAYLOAD);
    assert!(!harness.backup_exists());
    assert_eq!(harness.leftover_sessions(), 0);
    assert_eq!(*harness.platform.relaunched.lock(), vec![harness.install_path()]);
    assert!(harness.platform.opened.lock().is_empty());
    assert!(*controller.shutdown_signal().borrow());
    assert_eq!(controller.state(), UpdateState::Idle);

    let events = drain(&mut events);
    assert_eq!(
        events.first(),
        Some(&UpdateEvent::UpdateAvailable {
            version: "9.9.9".to_string()
        })
    );
    assert!(events.contains(&UpdateEvent::UpdateStarted {
        version: "9.9.9".to_string()
    }));
    assert_eq!(
        events.last(),
        Some(&UpdateEvent::RestartRequired {
            bundle: harness.install_path()
        })
    );
}

/// Observed states only move forward, and progress never goes back.
///
/// The watch channel may coalesce updates, so only ordering is checked here;
/// the downloader's own tests pin the final report at 1.0.
#[tokio::test]
async fn test_progress_is_monotonic() {
    let archive = vec![7u8; 512 * 1024];
    let harness = UpdateHarness::start(ReleaseFixture::newer(&archive)).await;
    let controller = harness.controller.clone();

    let mut states = controller.subscribe_state();
    let watcher = tokio::spawn(async move {
        let mut seen = Vec::new();
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            let done = state.is_idle();
            seen.push(state);
            if done {
                break;
            }
        }
        seen
    });

    assert!(controller.check_for_update().await);
    assert!(matches!(
        controller.perform_update().await,
        UpdateOutcome::Installed { .. }
    ));

    let seen = tokio::time::timeout(Duration::from_secs(5), watcher)
        .await
        .unwrap()
        .unwrap();
    let (last, during) = seen.split_last().unwrap();
    assert_eq!(*last, UpdateState::Idle);
    assert!(during.windows(2).all(|w| rank(&w[0]) <= rank(&w[1])));
    assert!(!during.iter().any(|s| matches!(s, UpdateState::Failed { .. })));

    let progress: Vec<f64> = seen
        .iter()
        .filter_map(|s| match s {
            UpdateState::Downloading { progress } => Some(*progress),
            _ => None,
        })
        .collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert!(progress.iter().all(|p| (0.0..=1.0).contains(p)));
}

/// Feed failures never surface; the check just finds nothing.
#[tokio::test]
async fn test_feed_failures_are_silent() {
    let mut fixture = ReleaseFixture::newer(NEW_PAYLOAD);
    fixture.feed_status = StatusCode::INTERNAL_SERVER_ERROR;
    let harness = UpdateHarness::start(fixture).await;
    let controller = &harness.controller;
    let mut events = controller.subscribe_events();

    assert!(!controller.check_for_update().await);
    assert!(controller.status().last_checked.is_none());

    harness.feed.update(|f| {
        f.feed_status = StatusCode::OK;
        f.raw_body = Some("<html>rate limited</html>".to_string());
    });
    assert!(!controller.check_for_update().await);

    assert!(drain(&mut events).is_empty());
    assert_eq!(controller.state(), UpdateState::Idle);
    assert_eq!(controller.perform_update().await, UpdateOutcome::NoUpdate);
}

/// A release that is not newer clears a previously found update.
#[tokio::test]
async fn test_same_version_clears_pending_update() {
    let harness = UpdateHarness::start(ReleaseFixture::newer(NEW_PAYLOAD)).await;
    let controller = &harness.controller;
    let mut events = controller.subscribe_events();

    assert!(controller.check_for_update().await);
    assert_eq!(controller.status().latest_version.as_deref(), Some("9.9.9"));

    harness.feed.update(|f| f.tag = "v1.0.0".to_string());
    assert!(!controller.check_for_update().await);

    let status = controller.status();
    assert!(!status.update_available);
    assert!(status.last_checked.is_some());
    assert_eq!(drain(&mut events).last(), Some(&UpdateEvent::UpdateCleared));

    harness.feed.update(|f| f.tag = "v0.9".to_string());
    assert!(!controller.check_for_update().await);
}

/// A missing archive fails the session, restores idle and offers the release page.
#[tokio::test]
async fn test_download_not_found_falls_back_to_release_page() {
    let mut fixture = ReleaseFixture::newer(NEW_PAYLOAD);
    fixture.archive = None;
    let harness = UpdateHarness::start(fixture).await;
    let controller = &harness.controller;
    let mut events = controller.subscribe_events();

    assert!(controller.check_for_update().await);
    let outcome = controller.perform_update().await;

    assert!(matches!(
        outcome,
        UpdateOutcome::Failed {
            degraded: false,
            ..
        }
    ));
    assert_eq!(controller.state(), UpdateState::Idle);
    assert_eq!(harness.installed_payload(), OLD_PAYLOAD);
    assert_eq!(harness.leftover_sessions(), 0);
    assert_eq!(
        *harness.platform.opened.lock(),
        vec![harness.feed.release_page("v9.9.9")]
    );
    assert!(harness.platform.relaunched.lock().is_empty());
    assert!(drain(&mut events).contains(&UpdateEvent::Failed {
        message: "Update failed".to_string()
    }));

    // The update stays pending for a later attempt
    assert!(controller.is_update_available());
}

/// An empty archive is a failed download.
#[tokio::test]
async fn test_empty_download_fails() {
    let harness = UpdateHarness::start(ReleaseFixture::newer(b"")).await;
    let controller = &harness.controller;

    assert!(controller.check_for_update().await);
    let outcome = controller.perform_update().await;

    assert!(matches!(outcome, UpdateOutcome::Failed { .. }));
    assert_eq!(harness.installed_payload(), OLD_PAYLOAD);
    assert_eq!(harness.leftover_sessions(), 0);
    assert_eq!(controller.state(), UpdateState::Idle);
}

/// An archive the extractor rejects leaves the install untouched.
#[tokio::test]
async fn test_corrupt_archive_fails_extraction() {
    let harness = UpdateHarness::start(ReleaseFixture::newer(b"corrupt zip")).await;
    let controller = &harness.controller;

    assert!(controller.check_for_update().await);
    let outcome = controller.perform_update().await;

    match outcome {
        UpdateOutcome::Failed { reason, degraded } => {
            assert!(!degraded);
            assert!(reason.contains("extraction failed"), "reason: {reason}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(harness.installed_payload(), OLD_PAYLOAD);
    assert!(!harness.backup_exists());
    assert_eq!(harness.platform.opened.lock().len(), 1);
}

/// Concurrent requests collapse into a single session.
#[tokio::test]
async fn test_concurrent_updates_run_one_session() {
    let harness = UpdateHarness::start(ReleaseFixture::newer(NEW_PAYLOAD)).await;
    let controller = &harness.controller;

    assert!(controller.check_for_update().await);
    let (first, second) = tokio::join!(controller.perform_update(), controller.perform_update());

    let outcomes = [first, second];
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, UpdateOutcome::Installed { .. }))
            .count(),
        1
    );
    assert!(outcomes.contains(&UpdateOutcome::Busy));
    assert_eq!(harness.feed.archive_hits(), 1);
    assert_eq!(harness.platform.relaunched.lock().len(), 1);
}

/// A release without the bundle asset is still an update, handled manually.
#[tokio::test]
async fn test_release_without_asset_opens_release_page() {
    let mut fixture = ReleaseFixture::newer(NEW_PAYLOAD);
    fixture.include_asset = false;
    let harness = UpdateHarness::start(fixture).await;
    let controller = &harness.controller;

    assert!(controller.check_for_update().await);
    assert_eq!(
        controller.perform_update().await,
        UpdateOutcome::OpenedReleasePage
    );
    assert_eq!(
        *harness.platform.opened.lock(),
        vec![harness.feed.release_page("v9.9.9")]
    );
    assert_eq!(harness.feed.archive_hits(), 0);
    assert_eq!(harness.installed_payload(), OLD_PAYLOAD);
}

/// With verification on, a matching digest installs.
#[tokio::test]
async fn test_verified_checksum_installs() {
    let mut fixture = ReleaseFixture::newer(NEW_PAYLOAD);
    fixture.checksum = Some(format!(
        "{}  {ASSET}\n",
        hex::encode(Sha256::digest(NEW_PAYLOAD))
    ));
    let harness = UpdateHarness::start_with(fixture, |c| c.verify_checksum = true).await;
    let controller = &harness.controller;

    assert!(controller.check_for_update().await);
    assert!(matches!(
        controller.perform_update().await,
        UpdateOutcome::Installed { .. }
    ));
    assert_eq!(harness.installed_payload().as_bytes(), NEW_PAYLOAD);
}

/// With verification on, a wrong digest fails before anything is replaced.
#[tokio::test]
async fn test_checksum_mismatch_fails() {
    let mut fixture = ReleaseFixture::newer(NEW_PAYLOAD);
    fixture.checksum = Some("0".repeat(64));
    let harness = UpdateHarness::start_with(fixture, |c| c.verify_checksum = true).await;
    let controller = &harness.controller;

    assert!(controller.check_for_update().await);
    match controller.perform_update().await {
        UpdateOutcome::Failed { reason, .. } => assert!(reason.contains("mismatch")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(harness.installed_payload(), OLD_PAYLOAD);
    assert_eq!(harness.leftover_sessions(), 0);
}

/// With verification on, a release without a checksum asset is rejected.
#[tokio::test]
async fn test_missing_checksum_fails_when_required() {
    let harness =
        UpdateHarness::start_with(ReleaseFixture::newer(NEW_PAYLOAD), |c| {
            c.verify_checksum = true;
        })
        .await;
    let controller = &harness.controller;

    assert!(controller.check_for_update().await);
    assert!(matches!(
        controller.perform_update().await,
        UpdateOutcome::Failed { .. }
    ));
    assert_eq!(harness.installed_payload(), OLD_PAYLOAD);
}

/// The run loop checks at start-up and installs when auto-install is on.
#[tokio::test]
async fn test_run_loop_auto_installs() {
    let harness = UpdateHarness::start_with(ReleaseFixture::newer(NEW_PAYLOAD), |c| {
        c.auto_install = true;
    })
    .await;
    let controller = harness.controller.clone();

    tokio::time::timeout(Duration::from_secs(10), controller.run())
        .await
        .expect("run loop should stop after installing");

    assert_eq!(harness.installed_payload().as_bytes(), NEW_PAYLOAD);
    assert_eq!(harness.platform.relaunched.lock().len(), 1);
}

/// A trigger wakes the loop for an extra check.
#[tokio::test]
async fn test_trigger_runs_extra_check() {
    let mut fixture = ReleaseFixture::newer(NEW_PAYLOAD);
    fixture.tag = "v1.0.0".to_string();
    let harness = UpdateHarness::start(fixture).await;
    let controller = harness.controller.clone();
    let mut events = controller.subscribe_events();

    let runner = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.run().await })
    };

    // Let the start-up check see the old release first
    tokio::time::timeout(Duration::from_secs(5), async {
        while controller.status().last_checked.is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    harness.feed.update(|f| f.tag = "v9.9.9".to_string());
    controller.trigger();

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event,
        UpdateEvent::UpdateAvailable {
            version: "9.9.9".to_string()
        }
    );

    controller.shutdown();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .unwrap()
        .unwrap();
}

async fn wait_for_idle(harness: &UpdateHarness) {
    tokio::time::timeout(Duration::from_secs(30), async {
        while !harness.controller.state().is_idle() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("controller never returned to idle");
}

/// Dropping an update while the bundles are being swapped still leaves a
/// complete bundle installed.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_update_dropped_mid_swap_keeps_bundle() {
    let harness = UpdateHarness::start(ReleaseFixture::newer(NEW_PAYLOAD)).await;
    let stale = harness.plant_stale_backup(20_000);
    let controller = harness.controller.clone();
    assert!(controller.check_for_update().await);

    let update = tokio::spawn({
        let controller = controller.clone();
        async move { controller.perform_update().await }
    });

    // The swap starts by clearing the stale backup
    tokio::time::timeout(Duration::from_secs(30), async {
        while harness.backup_files() >= stale {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("swap never started");
    update.abort();
    let _ = update.await;

    wait_for_idle(&harness).await;
    assert_eq!(harness.installed_payload().as_bytes(), NEW_PAYLOAD);
    assert!(!harness.backup_exists());
    assert_eq!(harness.leftover_sessions(), 0);
}

/// A session cancelled mid-flight frees the slot for the next attempt.
#[tokio::test]
async fn test_cancelled_update_does_not_block_later_updates() {
    let mut fixture = ReleaseFixture::newer(NEW_PAYLOAD);
    fixture.archive = None;
    let harness = UpdateHarness::start_with(fixture, |c| c.failure_reset_secs = 60).await;
    let controller = &harness.controller;
    let mut events = controller.subscribe_events();

    assert!(controller.check_for_update().await);
    // Fails fast, then sits in the failure delay until cancelled
    let cancelled =
        tokio::time::timeout(Duration::from_millis(500), controller.perform_update()).await;
    assert!(cancelled.is_err());
    assert_eq!(controller.state(), UpdateState::Idle);
    assert_eq!(harness.leftover_sessions(), 0);

    harness.feed.update(|f| {
        f.tag = "v9.9.10".to_string();
        f.archive = Some(NEW_PAYLOAD.to_vec());
    });
    assert!(controller.check_for_update().await);
    assert!(drain(&mut events).contains(&UpdateEvent::UpdateAvailable {
        version: "9.9.10".to_string()
    }));
    assert!(matches!(
        controller.perform_update().await,
        UpdateOutcome::Installed { .. }
    ));
    assert_eq!(harness.installed_payload().as_bytes(), NEW_PAYLOAD);
}

/// Without write access to the install directory nothing is touched.
#[tokio::test]
async fn test_read_only_install_dir_falls_back_to_release_page() {
    let harness = UpdateHarness::start(ReleaseFixture::newer(NEW_PAYLOAD)).await;
    let controller = &harness.controller;
    let apps = harness.applications_dir();
    std::fs::set_permissions(&apps, std::fs::Permissions::from_mode(0o555)).unwrap();
    if LocalFileOps.is_dir_writable(&apps) {
        // Running as root; permissions are not enforced
        std::fs::set_permissions(&apps, std::fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    assert!(controller.check_for_update().await);
    let outcome = controller.perform_update().await;
    std::fs::set_permissions(&apps, std::fs::Permissions::from_mode(0o755)).unwrap();

    match outcome {
        UpdateOutcome::Failed { reason, degraded } => {
            assert!(!degraded);
            assert!(reason.contains("no write permission"), "reason: {reason}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(harness.installed_payload(), OLD_PAYLOAD);
    assert!(!harness.backup_exists());
    assert_eq!(harness.leftover_sessions(), 0);
    assert_eq!(
        *harness.platform.opened.lock(),
        vec![harness.feed.release_page("v9.9.9")]
    );
    assert_eq!(controller.state(), UpdateState::Idle);
}

/// A failed install step puts the original bundle back.
#[tokio::test]
async fn test_failed_install_restores_original() {
    let harness = UpdateHarness::start_with_file_ops(ReleaseFixture::newer(NEW_PAYLOAD), |install| {
        Arc::new(LockedInstallSlot::new(install, true)) as Arc<dyn FileOps>
    })
    .await;
    let controller = &harness.controller;
    let mut events = controller.subscribe_events();

    assert!(controller.check_for_update().await);
    let outcome = controller.perform_update().await;

    match outcome {
        UpdateOutcome::Failed { reason, degraded } => {
            assert!(!degraded);
            assert!(reason.contains("original restored"), "reason: {reason}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(harness.installed_payload(), OLD_PAYLOAD);
    assert!(!harness.backup_exists());
    assert_eq!(harness.leftover_sessions(), 0);
    assert!(!drain(&mut events)
        .iter()
        .any(|e| matches!(e, UpdateEvent::InstallDegraded { .. })));
}

/// When neither bundle can be put in place the backup is reported.
#[tokio::test]
async fn test_degraded_install_reports_backup() {
    let harness = UpdateHarness::start_with_file_ops(ReleaseFixture::newer(NEW_PAYLOAD), |install| {
        Arc::new(LockedInstallSlot::new(install, false)) as Arc<dyn FileOps>
    })
    .await;
    let controller = &harness.controller;
    let mut events = controller.subscribe_events();

    assert!(controller.check_for_update().await);
    let outcome = controller.perform_update().await;

    assert!(matches!(
        outcome,
        UpdateOutcome::Failed { degraded: true, .. }
    ));
    assert!(!harness.install_path().exists());
    assert_eq!(
        std::fs::read_to_string(harness.backup_path().join("Contents/payload")).unwrap(),
        OLD_PAYLOAD
    );
    assert_eq!(harness.leftover_sessions(), 0);
    assert_eq!(
        *harness.platform.opened.lock(),
        vec![harness.feed.release_page("v9.9.9")]
    );
    assert!(harness.platform.relaunched.lock().is_empty());
    assert_eq!(controller.state(), UpdateState::Idle);

    let events = drain(&mut events);
    assert!(events.contains(&UpdateEvent::InstallDegraded {
        backup: harness.backup_path()
    }));
    assert!(events.contains(&UpdateEvent::Failed {
        message: "Update failed".to_string()
    }));
}

/// An installed update that cannot relaunch asks for a manual restart.
#[tokio::test]
async fn test_relaunch_failure_asks_for_restart() {
    let harness = UpdateHarness::start(ReleaseFixture::newer(NEW_PAYLOAD)).await;
    harness.platform.fail_relaunch.store(true, Ordering::SeqCst);
    let controller = &harness.controller;
    let mut events = controller.subscribe_events();

    assert!(controller.check_for_update().await);
    let outcome = controller.perform_update().await;

    match outcome {
        UpdateOutcome::Failed { reason, degraded } => {
            assert!(!degraded);
            assert!(reason.contains("Relaunch failed"), "reason: {reason}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(harness.installed_payload().as_bytes(), NEW_PAYLOAD);
    assert!(!harness.backup_exists());
    assert_eq!(harness.leftover_sessions(), 0);
    assert!(!*controller.shutdown_signal().borrow());
    assert!(harness.platform.opened.lock().is_empty());
    assert!(!controller.is_update_available());
    assert_eq!(controller.state(), UpdateState::Idle);

    let events = drain(&mut events);
    assert!(events.contains(&UpdateEvent::Failed {
        message: "Restart to finish updating".to_string()
    }));
    assert!(!events
        .iter()
        .any(|e| matches!(e, UpdateEvent::RestartRequired { .. })));
}
