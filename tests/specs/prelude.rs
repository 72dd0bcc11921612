//! Shared fixtures for the position persistence specs.

pub use chrono::{TimeZone, Utc};
pub use prometheus::Registry;
pub use skiff_core::{
    ContainerStatus, FakeClock, FileStatus, PositionsConfig,
};
pub use skiff_positions::{ContainerUpdate, FileUpdate, PositionTracker};
pub use std::path::Path;
pub use tempfile::TempDir;

/// Config rooted in a tempdir with adaptive flushing effectively off,
/// so specs control every flush explicitly unless they opt in.
pub fn quiet_config(dir: &TempDir) -> PositionsConfig {
    let mut cfg = PositionsConfig::new(dir.path().join("positions"));
    cfg.checkpoint_dir = Some(dir.path().join("checkpoints"));
    cfg.buffer.flush_interval_ms = 3_600_000;
    cfg.buffer.flush_batch_size = 1_000_000;
    cfg
}

pub fn tracker(cfg: PositionsConfig) -> (PositionTracker<FakeClock>, FakeClock) {
    let clock = FakeClock::new();
    let tracker = skiff_positions::PositionTracker::with_clock(cfg, clock.clone(), &Registry::new())
        .expect("tracker construction");
    (tracker, clock)
}

pub fn file_update(path: &str, offset: u64, size: u64, inode: u64) -> FileUpdate {
    FileUpdate {
        path: path.into(),
        offset,
        size,
        last_modified: Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap(),
        inode,
        device: 1,
        bytes_delta: offset,
        log_delta: 1,
    }
}

pub fn container_update(id: &str, since: chrono::DateTime<Utc>) -> ContainerUpdate {
    ContainerUpdate { container_id: id.into(), since, log_delta: 1, bytes_delta: 32 }
}
