// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory store of container positions with atomic JSON persistence.
//!
//! Containers resume by timestamp rather than byte offset, so there is no
//! rotation or truncation handling here. Stopped containers are kept
//! through cleanup because a restart makes their resume point valuable
//! again; only `removed` entries age out.

use crate::error::PositionError;
use crate::metrics::{PositionMetrics, STORE_CONTAINERS};
use crate::persist;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use skiff_core::{Clock, ContainerPosition, ContainerStatus};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// One observed read of a container stream, as reported by a reader.
///
/// `since` is the timestamp of the newest log line consumed; it becomes
/// both the resume point and the recorded `last_log_time`.
#[derive(Debug, Clone)]
pub struct ContainerUpdate {
    pub container_id: String,
    pub since: DateTime<Utc>,
    pub log_delta: u64,
    pub bytes_delta: u64,
}

/// Counts reported by [`ContainerPositionStore::stats`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContainerStoreStats {
    pub entries: usize,
    pub active: usize,
    pub stopped: usize,
    pub restarted: usize,
    pub removed: usize,
    pub total_log_count: u64,
    pub total_bytes_read: u64,
    pub dirty: bool,
}

struct Inner {
    positions: HashMap<String, ContainerPosition>,
    dirty: bool,
    seq: u64,
    last_save: Option<std::time::Instant>,
}

/// Map of `container_id -> ContainerPosition` behind a reader-writer
/// lock, persisted as pretty-printed JSON at a fixed path.
pub struct ContainerPositionStore<C: Clock> {
    path: PathBuf,
    inner: RwLock<Inner>,
    metrics: Arc<PositionMetrics>,
    clock: C,
}

impl<C: Clock> ContainerPositionStore<C> {
    pub fn new(path: PathBuf, metrics: Arc<PositionMetrics>, clock: C) -> Self {
        Self {
            path,
            inner: RwLock::new(Inner {
                positions: HashMap::new(),
                dirty: false,
                seq: 0,
                last_save: None,
            }),
            metrics,
            clock,
        }
    }

    /// Load the state file. A missing file is an empty store; anything
    /// unreadable or unparsable is `CorruptState`.
    pub fn load(&self) -> Result<usize, PositionError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(PositionError::CorruptState {
                    path: self.path.clone(),
                    reason: e.to_string(),
                })
            }
        };
        let positions: HashMap<String, ContainerPosition> =
            serde_json::from_slice(&bytes).map_err(|e| PositionError::CorruptState {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        let count = positions.len();
        let mut inner = self.inner.write();
        inner.positions = positions;
        inner.dirty = false;
        inner.seq += 1;
        tracing::info!(path = %self.path.display(), entries = count, "loaded container positions");
        Ok(count)
    }

    /// Persist the store if dirty. Returns whether a write happened.
    /// Same three-phase protocol as the file store.
    pub fn save(&self) -> Result<bool, PositionError> {
        let (snapshot, seq) = {
            let inner = self.inner.read();
            if !inner.dirty {
                return Ok(false);
            }
            (inner.positions.clone(), inner.seq)
        };

        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        persist::write_atomic(&self.path, &bytes).map_err(|source| PositionError::Persist {
            path: self.path.clone(),
            source,
        })?;

        {
            let mut inner = self.inner.write();
            if inner.seq == seq {
                inner.dirty = false;
            }
            inner.last_save = Some(self.clock.now());
        }

        self.metrics.record_save_success(STORE_CONTAINERS);
        self.metrics.file_size.with_label_values(&[STORE_CONTAINERS]).set(bytes.len() as i64);
        tracing::debug!(
            path = %self.path.display(),
            entries = snapshot.len(),
            "saved container positions"
        );
        Ok(true)
    }

    /// Apply one reader observation.
    pub fn update(&self, u: ContainerUpdate) {
        let now = self.clock.now_utc();
        let mut inner = self.inner.write();

        match inner.positions.entry(u.container_id.clone()) {
            Entry::Occupied(mut entry) => {
                let pos = entry.get_mut();
                pos.since = Some(u.since);
                pos.last_log_time = Some(u.since);
                pos.log_count += u.log_delta;
                pos.bytes_read += u.bytes_delta;
                pos.last_read = now;
            }
            Entry::Vacant(entry) => {
                entry.insert(ContainerPosition {
                    container_id: u.container_id.clone(),
                    since: Some(u.since),
                    last_read: now,
                    last_log_time: Some(u.since),
                    log_count: u.log_delta,
                    bytes_read: u.bytes_delta,
                    status: ContainerStatus::Active,
                    restart_count: 0,
                });
            }
        }

        inner.dirty = true;
        inner.seq += 1;
    }

    /// Deep copy of one entry
    pub fn get(&self, id: &str) -> Option<ContainerPosition> {
        self.inner.read().positions.get(id).cloned()
    }

    /// Deep copy of the whole map
    pub fn get_all(&self) -> HashMap<String, ContainerPosition> {
        self.inner.read().positions.clone()
    }

    /// Returns whether the entry existed. Transitioning to `restarted`
    /// bumps the restart counter.
    pub fn set_status(&self, id: &str, status: ContainerStatus) -> bool {
        let mut inner = self.inner.write();
        match inner.positions.get_mut(id) {
            Some(pos) => {
                if status == ContainerStatus::Restarted {
                    pos.restart_count += 1;
                }
                pos.status = status;
                inner.dirty = true;
                inner.seq += 1;
                true
            }
            None => false,
        }
    }

    /// Drop the entry entirely. Returns whether it existed.
    pub fn remove(&self, id: &str) -> bool {
        let mut inner = self.inner.write();
        if inner.positions.remove(id).is_some() {
            inner.dirty = true;
            inner.seq += 1;
            true
        } else {
            false
        }
    }

    /// Where should reading resume for this container?
    ///
    /// Unknown containers resume from their creation time when the caller
    /// supplies one (capturing logs emitted before the agent first saw
    /// the container), otherwise from now. Stopped or restarted
    /// containers resume from the last log line actually seen, which
    /// beats `since` because the stream restarted behind our bookmark.
    pub fn get_resume_since(&self, id: &str, created_at: Option<DateTime<Utc>>) -> DateTime<Utc> {
        let inner = self.inner.read();
        let Some(pos) = inner.positions.get(id) else {
            return created_at.unwrap_or_else(|| self.clock.now_utc());
        };

        if matches!(pos.status, ContainerStatus::Restarted | ContainerStatus::Stopped) {
            if let Some(last_log) = pos.last_log_time {
                return last_log;
            }
        }
        if let Some(since) = pos.since {
            return since;
        }
        self.clock.now_utc()
    }

    /// Remove `removed` entries whose `last_read` is older than
    /// `max_age`. Stopped containers survive because a restart makes
    /// their resume point valuable again.
    pub fn cleanup_old(&self, max_age: Duration) -> usize {
        let cutoff = match chrono::Duration::from_std(max_age) {
            Ok(age) => self.clock.now_utc() - age,
            Err(_) => return 0,
        };

        let stale: Vec<String> = {
            let inner = self.inner.read();
            inner
                .positions
                .iter()
                .filter(|(_, pos)| pos.status == ContainerStatus::Removed && pos.last_read < cutoff)
                .map(|(id, _)| id.clone())
                .collect()
        };
        if stale.is_empty() {
            return 0;
        }

        let mut inner = self.inner.write();
        let mut removed = 0;
        for id in &stale {
            if inner.positions.remove(id).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            inner.dirty = true;
            inner.seq += 1;
            tracing::debug!(removed, "cleaned up stale container positions");
        }
        removed
    }

    /// Replace the entire map, e.g. from a restored checkpoint. Marks the
    /// store dirty so the next flush rewrites the primary state file.
    pub fn replace_all(&self, positions: HashMap<String, ContainerPosition>) {
        let mut inner = self.inner.write();
        inner.positions = positions;
        inner.dirty = true;
        inner.seq += 1;
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.read().dirty
    }

    pub fn len(&self) -> usize {
        self.inner.read().positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().positions.is_empty()
    }

    /// Seconds since the last successful save, `None` before the first
    pub fn seconds_since_save(&self) -> Option<f64> {
        let last = self.inner.read().last_save?;
        Some(self.clock.now().duration_since(last).as_secs_f64())
    }

    pub fn stats(&self) -> ContainerStoreStats {
        let inner = self.inner.read();
        let mut stats = ContainerStoreStats {
            entries: inner.positions.len(),
            dirty: inner.dirty,
            ..Default::default()
        };
        for pos in inner.positions.values() {
            match pos.status {
                ContainerStatus::Active => stats.active += 1,
                ContainerStatus::Stopped => stats.stopped += 1,
                ContainerStatus::Restarted => stats.restarted += 1,
                ContainerStatus::Removed => stats.removed += 1,
            }
            stats.total_log_count += pos.log_count;
            stats.total_bytes_read += pos.bytes_read;
        }
        stats
    }
}

#[cfg(test)]
#[path = "container_store_tests.rs"]
mod tests;
