// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory store of file positions with atomic JSON persistence.
//!
//! Rotation and truncation are detected here, on every update, before the
//! incoming offset is accepted: a changed `(inode, device)` pair means the
//! path now points at a different file, a size regression means the file
//! was truncated in place. Both reset the offset to zero so the reader
//! restarts from the head of the new stream.

use crate::error::PositionError;
use crate::metrics::{PositionMetrics, STORE_FILES};
use crate::persist;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use skiff_core::{Clock, FilePosition, FileStatus};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// One observed read of a tailed file, as reported by a reader thread.
///
/// `inode`, `device`, and `size` come from the reader's stat of the file;
/// the store never stats files itself.
#[derive(Debug, Clone)]
pub struct FileUpdate {
    pub path: PathBuf,
    pub offset: u64,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub inode: u64,
    pub device: u64,
    pub bytes_delta: u64,
    pub log_delta: u64,
}

/// Counts reported by [`FilePositionStore::stats`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileStoreStats {
    pub entries: usize,
    pub active: usize,
    pub stopped: usize,
    pub removed: usize,
    pub deleted: usize,
    pub total_log_count: u64,
    pub total_bytes_read: u64,
    pub dirty: bool,
}

struct Inner {
    positions: HashMap<PathBuf, FilePosition>,
    dirty: bool,
    /// Bumped on every mutation; lets save() detect writes that raced it
    seq: u64,
    last_save: Option<std::time::Instant>,
}

/// Map of `path -> FilePosition` behind a reader-writer lock, persisted
/// as pretty-printed JSON at a fixed path.
pub struct FilePositionStore<C: Clock> {
    path: PathBuf,
    inner: RwLock<Inner>,
    metrics: Arc<PositionMetrics>,
    clock: C,
}

impl<C: Clock> FilePositionStore<C> {
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
        let positions: HashMap<PathBuf, FilePosition> =
            serde_json::from_slice(&bytes).map_err(|e| PositionError::CorruptState {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        let count = positions.len();
        let mut inner = self.inner.write();
        inner.positions = positions;
        inner.dirty = false;
        inner.seq += 1;
        tracing::info!(path = %self.path.display(), entries = count, "loaded file positions");
        Ok(count)
    }

    /// Persist the store if dirty. Returns whether a write happened.
    ///
    /// Runs in three phases so readers are never blocked on disk I/O:
    /// snapshot under the read lock, serialize and write with no lock
    /// held, then clear the dirty flag under the write lock. The flag is
    /// only cleared when no mutation raced the write, so a concurrent
    /// update is flushed by the next cycle rather than lost.
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

        self.metrics.record_save_success(STORE_FILES);
        self.metrics.file_size.with_label_values(&[STORE_FILES]).set(bytes.len() as i64);
        tracing::debug!(path = %self.path.display(), entries = snapshot.len(), "saved file positions");
        Ok(true)
    }

    /// Apply one reader observation, detecting rotation and truncation.
    pub fn update(&self, u: FileUpdate) {
        let now = self.clock.now_utc();
        let mut inner = self.inner.write();

        match inner.positions.entry(u.path.clone()) {
            Entry::Occupied(mut entry) => {
                let pos = entry.get_mut();
                if pos.inode != 0 && (pos.inode, pos.device) != (u.inode, u.device) {
                    tracing::info!(
                        path = %u.path.display(),
                        old_inode = pos.inode,
                        new_inode = u.inode,
                        "rotation detected, resetting offset"
                    );
                    pos.offset = 0;
                    self.metrics.record_rotation(&u.path.to_string_lossy());
                } else if u.size < pos.size {
                    tracing::info!(
                        path = %u.path.display(),
                        old_size = pos.size,
                        new_size = u.size,
                        "truncation detected, resetting offset"
                    );
                    pos.offset = 0;
                    self.metrics.record_truncation(&u.path.to_string_lossy());
                } else {
                    pos.offset = u.offset;
                }
                pos.size = u.size;
                pos.last_modified = u.last_modified;
                pos.inode = u.inode;
                pos.device = u.device;
                pos.log_count += u.log_delta;
                pos.bytes_read += u.bytes_delta;
                pos.last_read = now;
            }
            Entry::Vacant(entry) => {
                entry.insert(FilePosition {
                    file_path: u.path.clone(),
                    offset: u.offset,
                    size: u.size,
                    last_modified: u.last_modified,
                    last_read: now,
                    inode: u.inode,
                    device: u.device,
                    log_count: u.log_delta,
                    bytes_read: u.bytes_delta,
                    status: FileStatus::Active,
                });
            }
        }

        inner.dirty = true;
        inner.seq += 1;
    }

    /// Deep copy of one entry
    pub fn get(&self, path: &Path) -> Option<FilePosition> {
        self.inner.read().positions.get(path).cloned()
    }

    /// Deep copy of the whole map
    pub fn get_all(&self) -> HashMap<PathBuf, FilePosition> {
        self.inner.read().positions.clone()
    }

    /// Resume offset for a path, zero when unknown
    pub fn get_offset(&self, path: &Path) -> u64 {
        self.inner.read().positions.get(path).map(|p| p.offset).unwrap_or(0)
    }

    /// Returns whether the entry existed
    pub fn set_status(&self, path: &Path, status: FileStatus) -> bool {
        let mut inner = self.inner.write();
        match inner.positions.get_mut(path) {
            Some(pos) => {
                pos.status = status;
                inner.dirty = true;
                inner.seq += 1;
                true
            }
            None => false,
        }
    }

    /// Drop the entry entirely. Returns whether it existed.
    pub fn remove(&self, path: &Path) -> bool {
        let mut inner = self.inner.write();
        if inner.positions.remove(path).is_some() {
            inner.dirty = true;
            inner.seq += 1;
            true
        } else {
            false
        }
    }

    /// Remove terminal entries whose `last_read` is older than `max_age`.
    ///
    /// Keys are collected under the read lock first, then removed under
    /// the write lock, so the map is never mutated mid-iteration.
    pub fn cleanup_old(&self, max_age: Duration) -> usize {
        let cutoff = match chrono::Duration::from_std(max_age) {
            Ok(age) => self.clock.now_utc() - age,
            Err(_) => return 0,
        };

        let stale: Vec<PathBuf> = {
            let inner = self.inner.read();
            inner
                .positions
                .iter()
                .filter(|(_, pos)| pos.status.is_terminal() && pos.last_read < cutoff)
                .map(|(path, _)| path.clone())
                .collect()
        };
        if stale.is_empty() {
            return 0;
        }

        let mut inner = self.inner.write();
        let mut removed = 0;
        for path in &stale {
            if inner.positions.remove(path).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            inner.dirty = true;
            inner.seq += 1;
            tracing::debug!(removed, "cleaned up stale file positions");
        }
        removed
    }

    /// Replace the entire map, e.g. from a restored checkpoint. Marks the
    /// store dirty so the next flush rewrites the primary state file.
    pub fn replace_all(&self, positions: HashMap<PathBuf, FilePosition>) {
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

    pub fn stats(&self) -> FileStoreStats {
        let inner = self.inner.read();
        let mut stats = FileStoreStats {
            entries: inner.positions.len(),
            dirty: inner.dirty,
            ..Default::default()
        };
        for pos in inner.positions.values() {
            match pos.status {
                FileStatus::Active => stats.active += 1,
                FileStatus::Stopped => stats.stopped += 1,
                FileStatus::Removed => stats.removed += 1,
                FileStatus::Deleted => stats.deleted += 1,
            }
            stats.total_log_count += pos.log_count;
            stats.total_bytes_read += pos.bytes_read;
        }
        stats
    }
}

#[cfg(test)]
#[path = "file_store_tests.rs"]
mod tests;
