// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration for the position persistence core.
//!
//! All knobs deserialize from the agent's config file; every key is
//! optional and falls back to the documented default.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// State file name for file positions, relative to `positions_dir`
pub const FILE_POSITIONS_FILE: &str = "file_positions.json";

/// State file name for container positions, relative to `positions_dir`
pub const CONTAINER_POSITIONS_FILE: &str = "container_positions.json";

/// Top-level configuration for position persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionsConfig {
    /// Directory holding the two position state files
    pub positions_dir: PathBuf,
    /// Directory for compressed checkpoints; defaults to a `checkpoints`
    /// directory next to `positions_dir`
    #[serde(default)]
    pub checkpoint_dir: Option<PathBuf>,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub backpressure: BackpressureConfig,
}

impl PositionsConfig {
    pub fn new(positions_dir: impl Into<PathBuf>) -> Self {
        Self {
            positions_dir: positions_dir.into(),
            checkpoint_dir: None,
            buffer: BufferConfig::default(),
            checkpoint: CheckpointConfig::default(),
            backpressure: BackpressureConfig::default(),
        }
    }

    pub fn file_positions_path(&self) -> PathBuf {
        self.positions_dir.join(FILE_POSITIONS_FILE)
    }

    pub fn container_positions_path(&self) -> PathBuf {
        self.positions_dir.join(CONTAINER_POSITIONS_FILE)
    }

    /// Resolved checkpoint directory
    pub fn checkpoint_dir(&self) -> PathBuf {
        match &self.checkpoint_dir {
            Some(dir) => dir.clone(),
            None => match self.positions_dir.parent() {
                Some(parent) => parent.join("checkpoints"),
                None => self.positions_dir.join("checkpoints"),
            },
        }
    }
}

/// Buffer manager tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Upper bound on time between flushes
    pub flush_interval_ms: u64,
    /// Number of position mutations that force a flush
    pub flush_batch_size: u64,
    /// When false, only the timer and shutdown trigger flushes
    pub adaptive_flush_enabled: bool,
    /// Perform one unconditional flush during stop
    pub force_flush_on_exit: bool,
    pub cleanup_interval_secs: u64,
    /// TTL for terminal entries during cleanup
    pub max_position_age_secs: u64,
    /// Global cap on tracked file plus container entries
    pub max_memory_positions: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 5_000,
            flush_batch_size: 100,
            adaptive_flush_enabled: true,
            force_flush_on_exit: true,
            cleanup_interval_secs: 300,
            max_position_age_secs: 86_400,
            max_memory_positions: 5_000,
        }
    }
}

impl BufferConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn max_position_age(&self) -> Duration {
        Duration::from_secs(self.max_position_age_secs)
    }
}

/// Checkpoint store tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub interval_secs: u64,
    /// Newest checkpoints retained after each create
    pub max_checkpoints: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self { interval_secs: 300, max_checkpoints: 3 }
    }
}

impl CheckpointConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Backpressure detector tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackpressureConfig {
    pub enabled: bool,
    pub check_interval_ms: u64,
    pub low_threshold: f64,
    pub high_threshold: f64,
    pub critical_threshold: f64,
    pub auto_flush_on_high: bool,
    pub auto_flush_on_critical: bool,
    pub slow_down_on_critical: bool,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_ms: 1_000,
            low_threshold: 0.5,
            high_threshold: 0.8,
            critical_threshold: 0.95,
            auto_flush_on_high: true,
            auto_flush_on_critical: true,
            slow_down_on_critical: false,
        }
    }
}

impl BackpressureConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
