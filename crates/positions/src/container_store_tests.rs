// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::TimeZone;
use prometheus::Registry;
use skiff_core::FakeClock;
use tempfile::TempDir;

fn test_store() -> (TempDir, ContainerPositionStore<FakeClock>, FakeClock) {
    let dir = tempfile::tempdir().unwrap();
    let metrics = Arc::new(PositionMetrics::new(&Registry::new()).unwrap());
    let clock = FakeClock::new();
    let store = ContainerPositionStore::new(
        dir.path().join("container_positions.json"),
        metrics,
        clock.clone(),
    );
    (dir, store, clock)
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap()
}

fn update(id: &str, since: DateTime<Utc>) -> ContainerUpdate {
    ContainerUpdate { container_id: id.into(), since, log_delta: 1, bytes_delta: 64 }
}

#[test]
fn first_update_creates_active_entry() {
    let (_dir, store, _clock) = test_store();
    store.update(update("c1", t0()));

    let pos = store.get("c1").unwrap();
    assert_eq!(pos.status, ContainerStatus::Active);
    assert_eq!(pos.since, Some(t0()));
    assert_eq!(pos.last_log_time, Some(t0()));
    assert_eq!(pos.restart_count, 0);
    assert!(store.is_dirty());
}

#[test]
fn restarted_status_increments_restart_count() {
    let (_dir, store, _clock) = test_store();
    store.update(update("c1", t0()));
    assert!(store.set_status("c1", ContainerStatus::Restarted));
    assert!(store.set_status("c1", ContainerStatus::Restarted));
    let pos = store.get("c1").unwrap();
    assert_eq!(pos.restart_count, 2);
    assert_eq!(pos.status, ContainerStatus::Restarted);
}

#[test]
fn other_status_changes_leave_restart_count() {
    let (_dir, store, _clock) = test_store();
    store.update(update("c1", t0()));
    store.set_status("c1", ContainerStatus::Stopped);
    assert_eq!(store.get("c1").unwrap().restart_count, 0);
}

#[test]
fn set_status_on_unknown_container_is_a_noop() {
    let (_dir, store, _clock) = test_store();
    assert!(!store.set_status("ghost", ContainerStatus::Stopped));
    assert!(!store.is_dirty());
}

#[test]
fn resume_unknown_container_uses_creation_time() {
    let (_dir, store, _clock) = test_store();
    let created = t0();
    assert_eq!(store.get_resume_since("ghost", Some(created)), created);
}

#[test]
fn resume_unknown_container_without_creation_time_is_now() {
    let (_dir, store, clock) = test_store();
    assert_eq!(store.get_resume_since("ghost", None), clock.now_utc());
}

#[test]
fn resume_after_restart_uses_last_log_time() {
    let (_dir, store, _clock) = test_store();
    store.update(update("c1", t0()));
    store.set_status("c1", ContainerStatus::Restarted);
    assert_eq!(store.get_resume_since("c1", None), t0());
}

#[test]
fn resume_stopped_container_uses_last_log_time() {
    let (_dir, store, _clock) = test_store();
    store.update(update("c1", t0()));
    store.set_status("c1", ContainerStatus::Stopped);
    assert_eq!(store.get_resume_since("c1", None), t0());
}

#[test]
fn resume_active_container_uses_since() {
    let (_dir, store, _clock) = test_store();
    store.update(update("c1", t0()));
    assert_eq!(store.get_resume_since("c1", None), t0());
}

#[test]
fn save_then_load_round_trips_state() {
    let (_dir, store, clock) = test_store();
    store.update(update("c1", t0()));
    store.update(update("c2", t0()));
    store.set_status("c2", ContainerStatus::Stopped);
    store.save().unwrap();

    let metrics = Arc::new(PositionMetrics::new(&Registry::new()).unwrap());
    let fresh = ContainerPositionStore::new(store.path.clone(), metrics, clock);
    assert_eq!(fresh.load().unwrap(), 2);
    assert_eq!(fresh.get_all(), store.get_all());
}

#[test]
fn save_is_noop_when_clean() {
    let (_dir, store, _clock) = test_store();
    store.update(update("c1", t0()));
    assert!(store.save().unwrap());
    assert!(!store.save().unwrap());
}

#[test]
fn load_malformed_file_is_corrupt_state() {
    let (_dir, store, _clock) = test_store();
    std::fs::write(&store.path, b"[1, 2").unwrap();
    assert!(matches!(store.load(), Err(PositionError::CorruptState { .. })));
}

#[test]
fn cleanup_removes_only_stale_removed_entries() {
    let (_dir, store, clock) = test_store();
    store.update(update("active", t0()));
    store.update(update("stopped", t0()));
    store.update(update("removed", t0()));
    store.set_status("stopped", ContainerStatus::Stopped);
    store.set_status("removed", ContainerStatus::Removed);

    clock.advance(Duration::from_secs(7200));
    let removed = store.cleanup_old(Duration::from_secs(3600));

    assert_eq!(removed, 1);
    assert!(store.get("active").is_some());
    assert!(store.get("stopped").is_some(), "stopped containers must survive cleanup");
    assert!(store.get("removed").is_none());
}

#[test]
fn stats_count_by_status() {
    let (_dir, store, _clock) = test_store();
    store.update(update("c1", t0()));
    store.update(update("c2", t0()));
    store.update(update("c3", t0()));
    store.set_status("c2", ContainerStatus::Restarted);
    store.set_status("c3", ContainerStatus::Removed);

    let stats = store.stats();
    assert_eq!(stats.entries, 3);
    assert_eq!(stats.active, 1);
    assert_eq!(stats.restarted, 1);
    assert_eq!(stats.removed, 1);
    assert_eq!(stats.total_bytes_read, 192);
}
