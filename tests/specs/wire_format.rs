//! On-disk format specs: collaborators and already-deployed agents read
//! these files, so names and shapes are contractual.

use crate::specs::prelude::*;
use flate2::read::GzDecoder;
use std::io::Read;

#[tokio::test]
async fn file_positions_json_schema_is_stable() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = quiet_config(&dir);
    let state_path = cfg.file_positions_path();
    let (tracker, _clock) = tracker(cfg);

    tracker.update_file(file_update("/var/log/app.log", 128, 512, 7)).unwrap();
    tracker.flush_now().unwrap();
    tracker.stop().await.unwrap();

    let raw = std::fs::read_to_string(state_path).unwrap();
    assert!(raw.contains("\n  "), "state file must be 2-space indented JSON");

    let state: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let entry = &state["/var/log/app.log"];
    assert_eq!(entry["file_path"], "/var/log/app.log");
    assert_eq!(entry["offset"], 128);
    assert_eq!(entry["size"], 512);
    assert_eq!(entry["inode"], 7);
    assert_eq!(entry["device"], 1);
    assert_eq!(entry["status"], "active");
    assert!(entry["last_modified"].is_string());
    assert!(entry["last_read"].is_string());
    assert!(entry["log_count"].is_u64());
    assert!(entry["bytes_read"].is_u64());
}

#[tokio::test]
async fn container_positions_json_schema_is_stable() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = quiet_config(&dir);
    let state_path = cfg.container_positions_path();
    let (tracker, _clock) = tracker(cfg);
    let t0 = Utc.with_ymd_and_hms(2026, 5, 3, 12, 0, 0).unwrap();

    tracker.update_container(container_update("web-1", t0)).unwrap();
    tracker.set_container_status("web-1", ContainerStatus::Restarted).unwrap();
    tracker.flush_now().unwrap();
    tracker.stop().await.unwrap();

    let state: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(state_path).unwrap()).unwrap();
    let entry = &state["web-1"];
    assert_eq!(entry["container_id"], "web-1");
    assert_eq!(entry["status"], "restarted");
    assert_eq!(entry["restart_count"], 1);
    assert_eq!(entry["since"], "2026-05-03T12:00:00Z");
    assert_eq!(entry["last_log_time"], "2026-05-03T12:00:00Z");
}

#[tokio::test]
async fn checkpoints_are_gzipped_versioned_json() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = quiet_config(&dir);
    let checkpoint_dir = cfg.checkpoint_dir();
    let (tracker, _clock) = tracker(cfg);
    let t0 = Utc.with_ymd_and_hms(2026, 5, 3, 12, 0, 0).unwrap();

    tracker.update_file(file_update("/var/log/app.log", 9, 10, 1)).unwrap();
    tracker.update_container(container_update("c1", t0)).unwrap();
    tracker.checkpoint_now().unwrap();
    tracker.stop().await.unwrap();

    let path = std::fs::read_dir(checkpoint_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| p.extension().and_then(|x| x.to_str()) == Some("gz"))
        .unwrap();

    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("checkpoint_"));
    assert!(name.ends_with(".json.gz"));

    let mut json = Vec::new();
    GzDecoder::new(std::fs::File::open(&path).unwrap()).read_to_end(&mut json).unwrap();
    let data: serde_json::Value = serde_json::from_slice(&json).unwrap();

    assert_eq!(data["version"], "1.0");
    assert!(data["timestamp"].is_string());
    assert!(data["file_positions"]["/var/log/app.log"].is_object());
    assert!(data["container_positions"]["c1"].is_object());
    assert!(data["metadata"]["hostname"].is_string());
    assert!(data["metadata"]["created_by"].is_string());
}
