//! Disaster recovery specs: corrupt state files healing from
//! checkpoints, and checkpoint retention behavior over time.

use crate::specs::prelude::*;

#[tokio::test]
async fn corrupt_primary_state_heals_from_newest_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = quiet_config(&dir);
    let t0 = Utc.with_ymd_and_hms(2026, 5, 2, 7, 0, 0).unwrap();

    let (first, clock) = tracker(cfg.clone());
    first.update_file(file_update("/var/log/app.log", 500, 1_000, 3)).unwrap();
    first.update_container(container_update("db-1", t0)).unwrap();
    first.checkpoint_now().unwrap();

    // Newer state lands in a second checkpoint
    clock.advance(std::time::Duration::from_secs(60));
    first.update_file(file_update("/var/log/app.log", 900, 1_000, 3)).unwrap();
    first.checkpoint_now().unwrap();
    first.stop().await.unwrap();

    // Both primary files rot on disk
    std::fs::write(cfg.file_positions_path(), b"\0\0\0").unwrap();
    std::fs::write(cfg.container_positions_path(), b"not json").unwrap();

    let (revived, _clock) = tracker(cfg);
    revived.load().unwrap();
    assert_eq!(
        revived.resume_file_offset(Path::new("/var/log/app.log")),
        900,
        "must restore the newest checkpoint"
    );
    assert_eq!(revived.resume_container_since("db-1", None), t0);
}

#[tokio::test]
async fn recovery_without_checkpoints_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = quiet_config(&dir);
    std::fs::create_dir_all(&cfg.positions_dir).unwrap();
    std::fs::write(cfg.file_positions_path(), b"garbage").unwrap();

    let (tracker, _clock) = tracker(cfg);
    tracker.load().unwrap();
    assert_eq!(tracker.snapshot_stats().files.entries, 0);

    // The core keeps accepting updates after starting fresh
    tracker.update_file(file_update("/var/log/new.log", 1, 2, 1)).unwrap();
    assert_eq!(tracker.resume_file_offset(Path::new("/var/log/new.log")), 1);
}

#[tokio::test]
async fn checkpoint_retention_bounds_disk_usage() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = quiet_config(&dir);
    cfg.checkpoint.max_checkpoints = 3;
    let checkpoint_dir = cfg.checkpoint_dir();
    let (tracker, clock) = tracker(cfg);

    for i in 0..6u64 {
        tracker.update_file(file_update(&format!("/var/log/{i}.log"), i, i + 1, i + 1)).unwrap();
        tracker.checkpoint_now().unwrap();
        clock.advance(std::time::Duration::from_secs(30));
    }

    let kept: Vec<_> = std::fs::read_dir(&checkpoint_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("gz"))
        .collect();
    assert_eq!(kept.len(), 3);
    tracker.stop().await.unwrap();
}

#[tokio::test]
async fn final_checkpoint_written_on_stop_covers_last_updates() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = quiet_config(&dir);
    let checkpoint_dir = cfg.checkpoint_dir();
    let (first_tracker, _clock) = tracker(cfg.clone());

    first_tracker.start();
    first_tracker.update_file(file_update("/var/log/tail.log", 42, 100, 8)).unwrap();
    first_tracker.stop().await.unwrap();

    assert!(std::fs::read_dir(&checkpoint_dir).unwrap().next().is_some());

    // Even with both primaries gone, the shutdown checkpoint alone can
    // bring the positions back
    std::fs::write(cfg.file_positions_path(), b"x").unwrap();
    std::fs::write(cfg.container_positions_path(), b"x").unwrap();
    let (revived, _clock) = tracker(cfg);
    revived.load().unwrap();
    assert_eq!(revived.resume_file_offset(Path::new("/var/log/tail.log")), 42);
}
