// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Write-combining coordinator over the two position stores.
//!
//! Owns no position data itself. Every mutation funnels through here so
//! flush triggers fire consistently: a batch of updates, a timeout, the
//! memory cap, an explicit request, or shutdown. Two background loops
//! handle time-based flushing and TTL cleanup.

use crate::backpressure::RateCounters;
use crate::container_store::{ContainerPositionStore, ContainerUpdate};
use crate::error::PositionError;
use crate::file_store::{FilePositionStore, FileUpdate};
use crate::metrics::PositionMetrics;
use parking_lot::Mutex;
use serde::Serialize;
use skiff_core::{BufferConfig, Clock, ContainerStatus, FileStatus};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What caused a flush. The label ends up on the flush trigger counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// Batch size reached
    Updates,
    /// Flush interval elapsed
    Timeout,
    /// Final flush during stop
    Shutdown,
    /// Explicit flush_now request (including backpressure auto-flush)
    Manual,
    /// Emergency flush at the memory cap
    Memory,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Updates => "updates",
            FlushTrigger::Timeout => "timeout",
            FlushTrigger::Shutdown => "shutdown",
            FlushTrigger::Manual => "manual",
            FlushTrigger::Memory => "memory",
        }
    }
}

impl std::fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters reported by [`BufferManager::stats`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct BufferStats {
    pub total_flushes: u64,
    pub total_cleanups: u64,
    pub total_updates: u64,
    pub total_errors: u64,
    pub memory_limit_reached: u64,
    pub positions_dropped: u64,
    pub last_flush_duration_ms: u64,
    pub last_cleanup_duration_ms: u64,
    pub flush_trigger_updates: u64,
    pub flush_trigger_timeout: u64,
    pub flush_trigger_shutdown: u64,
    pub flush_trigger_manual: u64,
    pub flush_trigger_memory: u64,
}

#[derive(Default)]
struct Counters {
    total_flushes: AtomicU64,
    total_cleanups: AtomicU64,
    total_updates: AtomicU64,
    total_errors: AtomicU64,
    memory_limit_reached: AtomicU64,
    positions_dropped: AtomicU64,
    last_flush_duration_ms: AtomicU64,
    last_cleanup_duration_ms: AtomicU64,
    flush_trigger_updates: AtomicU64,
    flush_trigger_timeout: AtomicU64,
    flush_trigger_shutdown: AtomicU64,
    flush_trigger_manual: AtomicU64,
    flush_trigger_memory: AtomicU64,
}

impl Counters {
    fn bump_trigger(&self, trigger: FlushTrigger) {
        let counter = match trigger {
            FlushTrigger::Updates => &self.flush_trigger_updates,
            FlushTrigger::Timeout => &self.flush_trigger_timeout,
            FlushTrigger::Shutdown => &self.flush_trigger_shutdown,
            FlushTrigger::Manual => &self.flush_trigger_manual,
            FlushTrigger::Memory => &self.flush_trigger_memory,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct FlushState {
    updates_since_flush: u64,
    last_flush: Instant,
}

/// Coordinates adaptive flushing, the memory cap, and TTL cleanup for
/// both stores.
pub struct BufferManager<C: Clock> {
    config: BufferConfig,
    files: Arc<FilePositionStore<C>>,
    containers: Arc<ContainerPositionStore<C>>,
    metrics: Arc<PositionMetrics>,
    clock: C,
    flush_state: Mutex<FlushState>,
    counters: Counters,
    rates: Arc<RateCounters>,
    shutdown: AtomicBool,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<C: Clock> BufferManager<C> {
    pub fn new(
        config: BufferConfig,
        files: Arc<FilePositionStore<C>>,
        containers: Arc<ContainerPositionStore<C>>,
        metrics: Arc<PositionMetrics>,
        clock: C,
    ) -> Self {
        let last_flush = clock.now();
        Self {
            config,
            files,
            containers,
            metrics,
            clock,
            flush_state: Mutex::new(FlushState { updates_since_flush: 0, last_flush }),
            counters: Counters::default(),
            rates: Arc::new(RateCounters::default()),
            shutdown: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Shared update/save counters for the backpressure detector.
    pub fn rates(&self) -> Arc<RateCounters> {
        Arc::clone(&self.rates)
    }

    /// Record one file observation.
    pub fn update_file(&self, update: FileUpdate) -> Result<(), PositionError> {
        self.ensure_running()?;
        self.check_memory_cap()?;
        self.files.update(update);
        self.rates.file_updates.fetch_add(1, Ordering::Relaxed);
        self.note_update();
        Ok(())
    }

    /// Record one container observation.
    pub fn update_container(&self, update: ContainerUpdate) -> Result<(), PositionError> {
        self.ensure_running()?;
        self.check_memory_cap()?;
        self.containers.update(update);
        self.rates.container_updates.fetch_add(1, Ordering::Relaxed);
        self.note_update();
        Ok(())
    }

    pub fn set_file_status(&self, path: &Path, status: FileStatus) -> Result<(), PositionError> {
        self.ensure_running()?;
        if self.files.set_status(path, status) {
            self.note_update();
        }
        Ok(())
    }

    pub fn set_container_status(
        &self,
        id: &str,
        status: ContainerStatus,
    ) -> Result<(), PositionError> {
        self.ensure_running()?;
        if self.containers.set_status(id, status) {
            self.note_update();
        }
        Ok(())
    }

    pub fn remove_file(&self, path: &Path) -> Result<(), PositionError> {
        self.ensure_running()?;
        if self.files.remove(path) {
            self.note_update();
        }
        Ok(())
    }

    pub fn remove_container(&self, id: &str) -> Result<(), PositionError> {
        self.ensure_running()?;
        if self.containers.remove(id) {
            self.note_update();
        }
        Ok(())
    }

    /// Persist both stores if dirty.
    ///
    /// Both saves are attempted even when the first fails; the first
    /// error is returned. Never panics on I/O failure.
    pub fn flush(&self, trigger: FlushTrigger) -> Result<(), PositionError> {
        let start = Instant::now();
        let mut first_err = None;

        match self.files.save() {
            Ok(wrote) => {
                if wrote {
                    self.rates.saves.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(e) => {
                self.counters.total_errors.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_save_failure();
                tracing::warn!(error = %e, trigger = %trigger, "file position save failed");
                first_err = Some(e);
            }
        }
        match self.containers.save() {
            Ok(wrote) => {
                if wrote {
                    self.rates.saves.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(e) => {
                self.counters.total_errors.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_save_failure();
                tracing::warn!(error = %e, trigger = %trigger, "container position save failed");
                first_err = first_err.or(Some(e));
            }
        }

        let elapsed = start.elapsed().as_millis() as u64;
        self.counters.last_flush_duration_ms.store(elapsed, Ordering::Relaxed);
        self.counters.total_flushes.fetch_add(1, Ordering::Relaxed);
        self.counters.bump_trigger(trigger);
        self.metrics.record_flush_trigger(trigger.as_str());

        {
            let mut state = self.flush_state.lock();
            state.updates_since_flush = 0;
            state.last_flush = self.clock.now();
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Run one TTL cleanup pass over both stores.
    pub fn cleanup(&self) -> usize {
        let start = Instant::now();
        let max_age = self.config.max_position_age();
        let removed = self.files.cleanup_old(max_age) + self.containers.cleanup_old(max_age);
        self.counters
            .last_cleanup_duration_ms
            .store(start.elapsed().as_millis() as u64, Ordering::Relaxed);
        self.counters.total_cleanups.fetch_add(1, Ordering::Relaxed);
        removed
    }

    /// Spawn the flush and cleanup loops.
    pub fn start(self: Arc<Self>) {
        // Tickers are built before the tasks that consume them.
        let mut flush_ticker = tokio::time::interval(self.config.flush_interval());
        flush_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut cleanup_ticker = tokio::time::interval(self.config.cleanup_interval());
        cleanup_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let manager = Arc::clone(&self);
        let cancel = self.cancel.clone();
        let flush_loop = tokio::spawn(async move {
            flush_ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = flush_ticker.tick() => {
                        if let Err(e) = manager.flush(FlushTrigger::Timeout) {
                            tracing::warn!(error = %e, "periodic flush failed");
                        }
                    }
                }
            }
        });

        let manager = Arc::clone(&self);
        let cancel = self.cancel.clone();
        let cleanup_loop = tokio::spawn(async move {
            cleanup_ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = cleanup_ticker.tick() => {
                        let removed = manager.cleanup();
                        if removed > 0 {
                            tracing::debug!(removed, "periodic position cleanup");
                        }
                    }
                }
            }
        });

        self.tasks.lock().extend([flush_loop, cleanup_loop]);
    }

    /// Cancel and join the loops, then flush once with the shutdown
    /// trigger. Idempotent.
    pub async fn stop(&self) -> Result<(), PositionError> {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancel.cancel();
        let tasks: Vec<_> = {
            let mut guard = self.tasks.lock();
            guard.drain(..).collect()
        };
        for task in tasks {
            let _ = task.await;
        }

        if self.config.force_flush_on_exit {
            self.flush(FlushTrigger::Shutdown)
        } else {
            Ok(())
        }
    }

    pub fn stats(&self) -> BufferStats {
        let c = &self.counters;
        BufferStats {
            total_flushes: c.total_flushes.load(Ordering::Relaxed),
            total_cleanups: c.total_cleanups.load(Ordering::Relaxed),
            total_updates: c.total_updates.load(Ordering::Relaxed),
            total_errors: c.total_errors.load(Ordering::Relaxed),
            memory_limit_reached: c.memory_limit_reached.load(Ordering::Relaxed),
            positions_dropped: c.positions_dropped.load(Ordering::Relaxed),
            last_flush_duration_ms: c.last_flush_duration_ms.load(Ordering::Relaxed),
            last_cleanup_duration_ms: c.last_cleanup_duration_ms.load(Ordering::Relaxed),
            flush_trigger_updates: c.flush_trigger_updates.load(Ordering::Relaxed),
            flush_trigger_timeout: c.flush_trigger_timeout.load(Ordering::Relaxed),
            flush_trigger_shutdown: c.flush_trigger_shutdown.load(Ordering::Relaxed),
            flush_trigger_manual: c.flush_trigger_manual.load(Ordering::Relaxed),
            flush_trigger_memory: c.flush_trigger_memory.load(Ordering::Relaxed),
        }
    }

    fn ensure_running(&self) -> Result<(), PositionError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(PositionError::Shutdown);
        }
        Ok(())
    }

    /// Enforce the global entry cap before an upsert.
    ///
    /// At the cap, one emergency flush is attempted; if it fails the
    /// update is dropped rather than queued, keeping memory bounded.
    fn check_memory_cap(&self) -> Result<(), PositionError> {
        let total = self.files.len() + self.containers.len();
        if total < self.config.max_memory_positions {
            return Ok(());
        }

        self.counters.memory_limit_reached.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            total,
            limit = self.config.max_memory_positions,
            "position memory cap reached, forcing flush"
        );
        if let Err(e) = self.flush(FlushTrigger::Memory) {
            self.counters.positions_dropped.fetch_add(1, Ordering::Relaxed);
            self.metrics.positions_dropped.inc();
            tracing::warn!(error = %e, "emergency flush failed, dropping update");
            return Err(PositionError::MemoryCapReached {
                limit: self.config.max_memory_positions,
            });
        }
        Ok(())
    }

    /// Count one mutation and apply the adaptive flush thresholds.
    fn note_update(&self) {
        self.counters.total_updates.fetch_add(1, Ordering::Relaxed);

        let trigger = {
            let mut state = self.flush_state.lock();
            state.updates_since_flush += 1;
            if !self.config.adaptive_flush_enabled {
                None
            } else if state.updates_since_flush >= self.config.flush_batch_size {
                Some(FlushTrigger::Updates)
            } else if self.clock.now().duration_since(state.last_flush)
                >= self.config.flush_interval()
            {
                Some(FlushTrigger::Timeout)
            } else {
                None
            }
        };

        if let Some(trigger) = trigger {
            if let Err(e) = self.flush(trigger) {
                tracing::warn!(error = %e, trigger = %trigger, "adaptive flush failed");
            }
        }
    }
}

#[cfg(test)]
#[path = "buffer_tests.rs"]
mod tests;
