// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The facade external readers interact with.
//!
//! Thin by design: construction wires the stores, buffer manager,
//! checkpoint store, and backpressure detector together; every call
//! delegates. Startup recovery lives here because it spans components:
//! a corrupt primary state file falls back to the newest checkpoint,
//! and failing that the core starts empty rather than refusing to run.

use crate::backpressure::{BackpressureDetector, BackpressureLevel};
use crate::buffer::{BufferManager, BufferStats, FlushTrigger};
use crate::checkpoint::CheckpointStore;
use crate::container_store::{ContainerPositionStore, ContainerStoreStats, ContainerUpdate};
use crate::error::PositionError;
use crate::file_store::{FilePositionStore, FileStoreStats, FileUpdate};
use crate::metrics::PositionMetrics;
use chrono::{DateTime, Utc};
use prometheus::Registry;
use serde::Serialize;
use skiff_core::{Clock, ContainerStatus, FileStatus, PositionsConfig, SystemClock};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Nested counters handed to operator-facing status surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub buffer_manager: BufferStats,
    pub files: FileStoreStats,
    pub containers: ContainerStoreStats,
}

/// Entry point for the position persistence core.
pub struct PositionTracker<C: Clock = SystemClock> {
    backpressure_enabled: bool,
    files: Arc<FilePositionStore<C>>,
    containers: Arc<ContainerPositionStore<C>>,
    buffer: Arc<BufferManager<C>>,
    checkpoints: Arc<CheckpointStore<C>>,
    detector: Arc<BackpressureDetector<C>>,
    stopped: AtomicBool,
}

impl PositionTracker<SystemClock> {
    /// Construct with the real clock, registering metrics on `registry`.
    pub fn new(config: PositionsConfig, registry: &Registry) -> Result<Self, PositionError> {
        Self::with_clock(config, SystemClock, registry)
    }
}

impl<C: Clock> PositionTracker<C> {
    pub fn with_clock(
        config: PositionsConfig,
        clock: C,
        registry: &Registry,
    ) -> Result<Self, PositionError> {
        std::fs::create_dir_all(&config.positions_dir)?;

        let metrics = Arc::new(PositionMetrics::new(registry)?);
        let files = Arc::new(FilePositionStore::new(
            config.file_positions_path(),
            Arc::clone(&metrics),
            clock.clone(),
        ));
        let containers = Arc::new(ContainerPositionStore::new(
            config.container_positions_path(),
            Arc::clone(&metrics),
            clock.clone(),
        ));
        let buffer = Arc::new(BufferManager::new(
            config.buffer.clone(),
            Arc::clone(&files),
            Arc::clone(&containers),
            Arc::clone(&metrics),
            clock.clone(),
        ));
        let checkpoints = Arc::new(CheckpointStore::new(
            config.checkpoint_dir(),
            config.checkpoint.clone(),
            Arc::clone(&files),
            Arc::clone(&containers),
            Arc::clone(&metrics),
            clock.clone(),
        ));
        let detector = Arc::new(BackpressureDetector::new(
            config.backpressure.clone(),
            buffer.rates(),
            Arc::clone(&metrics),
            clock,
        ));

        let flush_target = Arc::clone(&buffer);
        detector.register_flush_callback(Arc::new(move || {
            if let Err(e) = flush_target.flush(FlushTrigger::Manual) {
                tracing::warn!(error = %e, "backpressure flush failed");
            }
        }));

        Ok(Self {
            backpressure_enabled: config.backpressure.enabled,
            files,
            containers,
            buffer,
            checkpoints,
            detector,
            stopped: AtomicBool::new(false),
        })
    }

    /// Load primary state files, falling back to the newest checkpoint
    /// for any store whose file is corrupt. A failed restore logs once
    /// and starts that store empty; data loss is bounded by the
    /// checkpoint interval.
    pub fn load(&self) -> Result<(), PositionError> {
        let files_result = self.files.load();
        let containers_result = self.containers.load();
        if files_result.is_ok() && containers_result.is_ok() {
            return Ok(());
        }

        if let Err(e) = &files_result {
            tracing::warn!(error = %e, "file positions unreadable, attempting checkpoint restore");
        }
        if let Err(e) = &containers_result {
            tracing::warn!(error = %e, "container positions unreadable, attempting checkpoint restore");
        }

        match self.checkpoints.restore_latest() {
            Ok(data) => {
                // Only the corrupt store takes the checkpoint copy; a
                // healthy primary file is newer than any checkpoint.
                if files_result.is_err() {
                    self.files.replace_all(data.file_positions);
                }
                if containers_result.is_err() {
                    self.containers.replace_all(data.container_positions);
                }
                tracing::info!(
                    files = self.files.len(),
                    containers = self.containers.len(),
                    "recovered positions from checkpoint"
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "checkpoint restore failed, starting with empty state");
                Ok(())
            }
        }
    }

    /// Spawn the background loops: flush, cleanup, checkpoint, and
    /// backpressure evaluation.
    pub fn start(&self) {
        Arc::clone(&self.buffer).start();
        Arc::clone(&self.checkpoints).start();
        if self.backpressure_enabled {
            Arc::clone(&self.detector).start();
        }
        tracing::info!("position tracker started");
    }

    /// Stop everything: detector first, then the buffer loops with their
    /// shutdown flush, then the checkpoint loop with its final
    /// checkpoint. Idempotent; returns the first error encountered.
    pub async fn stop(&self) -> Result<(), PositionError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.detector.stop().await;
        let flush_result = self.buffer.stop().await;
        self.checkpoints.stop().await;
        tracing::info!("position tracker stopped");
        flush_result
    }

    pub fn update_file(&self, update: FileUpdate) -> Result<(), PositionError> {
        self.buffer.update_file(update)
    }

    pub fn update_container(&self, update: ContainerUpdate) -> Result<(), PositionError> {
        self.buffer.update_container(update)
    }

    pub fn set_file_status(&self, path: &Path, status: FileStatus) -> Result<(), PositionError> {
        self.buffer.set_file_status(path, status)
    }

    pub fn set_container_status(
        &self,
        id: &str,
        status: ContainerStatus,
    ) -> Result<(), PositionError> {
        self.buffer.set_container_status(id, status)
    }

    pub fn remove_file(&self, path: &Path) -> Result<(), PositionError> {
        self.buffer.remove_file(path)
    }

    pub fn remove_container(&self, id: &str) -> Result<(), PositionError> {
        self.buffer.remove_container(id)
    }

    /// Byte offset to resume reading a file from, zero when unknown.
    /// Reads keep working after stop.
    pub fn resume_file_offset(&self, path: &Path) -> u64 {
        self.files.get_offset(path)
    }

    /// Timestamp to resume reading a container from.
    pub fn resume_container_since(
        &self,
        id: &str,
        created_at: Option<DateTime<Utc>>,
    ) -> DateTime<Utc> {
        self.containers.get_resume_since(id, created_at)
    }

    /// Flush both stores now, labeled as a manual trigger.
    pub fn flush_now(&self) -> Result<(), PositionError> {
        self.buffer.flush(FlushTrigger::Manual)
    }

    /// Queue utilization reported by the downstream delivery pipeline.
    pub fn set_queue_utilization(&self, utilization: f64) {
        self.detector.set_queue_utilization(utilization);
    }

    pub fn backpressure_level(&self) -> BackpressureLevel {
        self.detector.level()
    }

    pub fn snapshot_stats(&self) -> StatsReport {
        StatsReport {
            buffer_manager: self.buffer.stats(),
            files: self.files.stats(),
            containers: self.containers.stats(),
        }
    }

    /// Write a checkpoint immediately, outside the periodic schedule.
    pub fn checkpoint_now(&self) -> Result<(), PositionError> {
        self.checkpoints.create().map(|_| ())
    }
}

#[cfg(test)]
#[path = "tracker_tests.rs"]
mod tests;
