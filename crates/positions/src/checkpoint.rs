// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Versioned, compressed snapshots of both position stores.
//!
//! Checkpoints are the disaster recovery path: when a primary state file
//! is corrupt at startup, the tracker restores the newest checkpoint and
//! carries on, bounding data loss to one checkpoint interval. Files are
//! gzip of the JSON snapshot, timestamp-named down to microseconds so
//! rapid successive creates never collide.

use crate::container_store::ContainerPositionStore;
use crate::error::PositionError;
use crate::file_store::FilePositionStore;
use crate::metrics::{PositionMetrics, STORE_CONTAINERS, STORE_FILES};
use crate::persist;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use skiff_core::{CheckpointConfig, Clock, ContainerPosition, FilePosition};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Schema version written into every checkpoint
pub const CHECKPOINT_VERSION: &str = "1.0";

/// Full snapshot of both stores at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointData {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub container_positions: HashMap<String, ContainerPosition>,
    pub file_positions: HashMap<PathBuf, FilePosition>,
    pub metadata: CheckpointMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub hostname: String,
    pub created_by: String,
}

/// One checkpoint file on disk, newest first in listings.
#[derive(Debug, Clone)]
pub struct CheckpointInfo {
    pub path: PathBuf,
    pub modified: SystemTime,
    pub size_bytes: u64,
}

/// Periodic checkpoint writer with generational retention.
pub struct CheckpointStore<C: Clock> {
    dir: PathBuf,
    config: CheckpointConfig,
    files: Arc<FilePositionStore<C>>,
    containers: Arc<ContainerPositionStore<C>>,
    metrics: Arc<PositionMetrics>,
    clock: C,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    last_created: Mutex<Option<Instant>>,
}

impl<C: Clock> CheckpointStore<C> {
    pub fn new(
        dir: PathBuf,
        config: CheckpointConfig,
        files: Arc<FilePositionStore<C>>,
        containers: Arc<ContainerPositionStore<C>>,
        metrics: Arc<PositionMetrics>,
        clock: C,
    ) -> Self {
        Self {
            dir,
            config,
            files,
            containers,
            metrics,
            clock,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
            last_created: Mutex::new(None),
        }
    }

    /// Spawn the periodic checkpoint task.
    pub fn start(self: Arc<Self>) {
        // Ticker exists before the task does, so the loop never observes
        // a half-initialized scheduler.
        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let store = Arc::clone(&self);
        let cancel = self.cancel.clone();
        let task = tokio::spawn(async move {
            // The first tick of a tokio interval fires immediately;
            // consume it so the first checkpoint lands one interval in.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => store.tick(),
                }
            }
        });
        *self.task.lock() = Some(task);
    }

    /// Cancel the loop, join it, then write one final checkpoint.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        if let Err(e) = self.create() {
            tracing::warn!(error = %e, "final checkpoint failed");
        }
    }

    fn tick(&self) {
        self.publish_observability();
        if let Err(e) = self.create() {
            tracing::warn!(error = %e, "periodic checkpoint failed");
            self.metrics.set_checkpoint_health(false);
        }
    }

    /// Refresh the gauges this loop owns: checkpoint age, estimated
    /// position memory, per-status entry counts, and save lag.
    fn publish_observability(&self) {
        if let Some(last) = *self.last_created.lock() {
            let age = self.clock.now().duration_since(last).as_secs_f64();
            self.metrics.checkpoint_age.set(age);
        }

        let file_count = self.files.len() as i64;
        let container_count = self.containers.len() as i64;
        self.metrics.memory_usage.set(256 * container_count + 128 * file_count);

        let fs = self.files.stats();
        let cs = self.containers.stats();
        let by_status = &self.metrics.active_by_status;
        by_status.with_label_values(&["active"]).set((fs.active + cs.active) as i64);
        by_status.with_label_values(&["stopped"]).set((fs.stopped + cs.stopped) as i64);
        by_status.with_label_values(&["removed"]).set((fs.removed + cs.removed) as i64);
        by_status.with_label_values(&["deleted"]).set(fs.deleted as i64);
        by_status.with_label_values(&["restarted"]).set(cs.restarted as i64);

        if let Some(lag) = self.files.seconds_since_save() {
            self.metrics.observe_lag(STORE_FILES, lag);
        }
        if let Some(lag) = self.containers.seconds_since_save() {
            self.metrics.observe_lag(STORE_CONTAINERS, lag);
        }
    }

    /// Snapshot both stores into a new compressed checkpoint file, then
    /// apply retention.
    pub fn create(&self) -> Result<PathBuf, PositionError> {
        let timestamp = self.clock.now_utc();
        let data = CheckpointData {
            version: CHECKPOINT_VERSION.to_string(),
            timestamp,
            container_positions: self.containers.get_all(),
            file_positions: self.files.get_all(),
            metadata: CheckpointMetadata {
                hostname: hostname::get()
                    .map(|h| h.to_string_lossy().into_owned())
                    .unwrap_or_else(|_| "unknown".to_string()),
                created_by: concat!("skiff/", env!("CARGO_PKG_VERSION")).to_string(),
            },
        };

        let json = serde_json::to_vec(&data)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json)?;
        let bytes = encoder.finish()?;

        let name = format!("checkpoint_{}.json.gz", timestamp.format("%Y-%m-%d_%H-%M-%S%.6f"));
        let path = self.dir.join(name);
        persist::write_atomic(&path, &bytes).map_err(|source| PositionError::Persist {
            path: path.clone(),
            source,
        })?;

        *self.last_created.lock() = Some(self.clock.now());
        self.metrics.checkpoint_created.inc();
        self.metrics.checkpoint_size.set(bytes.len() as i64);
        self.metrics.checkpoint_age.set(0.0);
        self.metrics.set_checkpoint_health(true);
        tracing::debug!(
            path = %path.display(),
            files = data.file_positions.len(),
            containers = data.container_positions.len(),
            bytes = bytes.len(),
            "checkpoint created"
        );

        self.cleanup_old();
        Ok(path)
    }

    /// Delete everything beyond the newest `max_checkpoints` files.
    /// Failed deletes are logged, not fatal.
    fn cleanup_old(&self) {
        let checkpoints = match self.list() {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!(error = %e, "checkpoint retention listing failed");
                return;
            }
        };
        for old in checkpoints.iter().skip(self.config.max_checkpoints) {
            if let Err(e) = std::fs::remove_file(&old.path) {
                tracing::warn!(path = %old.path.display(), error = %e, "failed to prune checkpoint");
            }
        }
    }

    /// Enumerate checkpoint files, newest first.
    ///
    /// Any `.gz` in the directory counts; the `checkpoint_` prefix is a
    /// naming convention, not a requirement.
    pub fn list(&self) -> Result<Vec<CheckpointInfo>, PositionError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut checkpoints = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("gz") {
                continue;
            }
            let meta = entry.metadata()?;
            checkpoints.push(CheckpointInfo {
                path,
                modified: meta.modified()?,
                size_bytes: meta.len(),
            });
        }

        // Newest first; filename breaks mtime ties since names embed a
        // microsecond timestamp.
        checkpoints.sort_by(|a, b| {
            b.modified.cmp(&a.modified).then_with(|| b.path.cmp(&a.path))
        });
        Ok(checkpoints)
    }

    /// Load the newest checkpoint.
    pub fn restore_latest(&self) -> Result<CheckpointData, PositionError> {
        match self.try_restore_latest() {
            Ok(data) => {
                self.metrics.record_checkpoint_restore(true);
                tracing::info!(
                    files = data.file_positions.len(),
                    containers = data.container_positions.len(),
                    version = %data.version,
                    "restored checkpoint"
                );
                Ok(data)
            }
            Err(e) => {
                self.metrics.record_checkpoint_restore(false);
                Err(e)
            }
        }
    }

    fn try_restore_latest(&self) -> Result<CheckpointData, PositionError> {
        let checkpoints = self.list()?;
        let newest = checkpoints
            .first()
            .ok_or_else(|| PositionError::CheckpointCorrupt("no checkpoints found".to_string()))?;
        read_checkpoint(&newest.path)
    }
}

/// Gunzip and parse one checkpoint file.
fn read_checkpoint(path: &Path) -> Result<CheckpointData, PositionError> {
    let file = std::fs::File::open(path)
        .map_err(|e| PositionError::CheckpointCorrupt(format!("{}: {e}", path.display())))?;
    let mut json = Vec::new();
    GzDecoder::new(file)
        .read_to_end(&mut json)
        .map_err(|e| PositionError::CheckpointCorrupt(format!("{}: {e}", path.display())))?;
    serde_json::from_slice(&json)
        .map_err(|e| PositionError::CheckpointCorrupt(format!("{}: {e}", path.display())))
}

#[cfg(test)]
#[path = "checkpoint_tests.rs"]
mod tests;
