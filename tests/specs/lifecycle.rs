//! Full agent lifecycle specs: updates, shutdown flush, and resuming
//! from persisted state after a restart.

use crate::specs::prelude::*;

#[tokio::test]
async fn shutdown_flush_persists_every_accepted_update() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = quiet_config(&dir);
    let state_path = cfg.file_positions_path();
    let (tracker, _clock) = tracker(cfg);

    tracker.start();
    for i in 0..50 {
        tracker.update_file(file_update(&format!("/var/log/svc-{i}.log"), 100, 200, i + 1)).unwrap();
    }
    tracker.stop().await.unwrap();

    let stats = tracker.snapshot_stats();
    assert_eq!(stats.buffer_manager.flush_trigger_shutdown, 1);

    let raw = std::fs::read_to_string(state_path).unwrap();
    let state: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(state.as_object().unwrap().len(), 50);
}

#[tokio::test]
async fn restart_resumes_files_from_persisted_offsets() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = quiet_config(&dir);

    // First life of the agent
    let (first, _clock) = tracker(cfg.clone());
    first.load().unwrap();
    first.update_file(file_update("/var/log/app.log", 4_096, 8_192, 11)).unwrap();
    first.stop().await.unwrap();

    // Second life resumes exactly where the first left off
    let (second, _clock) = tracker(cfg);
    second.load().unwrap();
    assert_eq!(second.resume_file_offset(Path::new("/var/log/app.log")), 4_096);
}

#[tokio::test]
async fn rotation_detected_across_restart_resets_resume_offset() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = quiet_config(&dir);

    let (first, _clock) = tracker(cfg.clone());
    first.update_file(file_update("/var/log/app.log", 1_000, 2_000, 100)).unwrap();
    first.stop().await.unwrap();

    let (second, _clock) = tracker(cfg);
    second.load().unwrap();
    // Logrotate replaced the file while the agent was down
    second.update_file(file_update("/var/log/app.log", 777, 500, 200)).unwrap();
    assert_eq!(second.resume_file_offset(Path::new("/var/log/app.log")), 0);
}

#[tokio::test]
async fn restart_resumes_containers_from_recorded_timestamps() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = quiet_config(&dir);
    let t0 = Utc.with_ymd_and_hms(2026, 5, 1, 9, 30, 0).unwrap();

    let (first, _clock) = tracker(cfg.clone());
    first.update_container(container_update("web-1", t0)).unwrap();
    first.set_container_status("web-1", ContainerStatus::Stopped).unwrap();
    first.stop().await.unwrap();

    let (second, _clock) = tracker(cfg);
    second.load().unwrap();
    assert_eq!(second.resume_container_since("web-1", None), t0);

    // Containers never seen before fall back to their creation time
    let created = Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 0).unwrap();
    assert_eq!(second.resume_container_since("web-2", Some(created)), created);
}

#[tokio::test]
async fn batch_flushing_persists_during_steady_traffic() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = quiet_config(&dir);
    cfg.buffer.flush_batch_size = 100;
    let (tracker, _clock) = tracker(cfg);

    for i in 0..250u64 {
        tracker.update_file(file_update(&format!("/var/log/{i}.log"), i, i + 10, i + 1)).unwrap();
    }

    let stats = tracker.snapshot_stats();
    assert!(stats.buffer_manager.total_flushes >= 2);
    assert_eq!(stats.buffer_manager.flush_trigger_updates, 2);
    assert_eq!(stats.buffer_manager.flush_trigger_timeout, 0);
    tracker.stop().await.unwrap();
}

#[tokio::test]
async fn stats_report_reflects_store_contents() {
    let dir = tempfile::tempdir().unwrap();
    let (tracker, _clock) = tracker(quiet_config(&dir));
    let t0 = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();

    tracker.update_file(file_update("/a", 1, 2, 1)).unwrap();
    tracker.update_file(file_update("/b", 1, 2, 2)).unwrap();
    tracker.set_file_status(Path::new("/b"), FileStatus::Stopped).unwrap();
    tracker.update_container(container_update("c1", t0)).unwrap();

    let stats = tracker.snapshot_stats();
    assert_eq!(stats.files.entries, 2);
    assert_eq!(stats.files.active, 1);
    assert_eq!(stats.files.stopped, 1);
    assert_eq!(stats.containers.entries, 1);
    assert_eq!(stats.buffer_manager.total_updates, 4);
    tracker.stop().await.unwrap();
}
