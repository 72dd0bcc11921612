// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Detects when position updates outpace persistence.
//!
//! A periodic evaluation compares update and save rates from shared
//! counters, folds in queue utilization when a collaborator reports it,
//! and classifies the result into a level. Elevated levels can trigger
//! an auto-flush through a registered callback; the callback is always
//! invoked after the detector's own lock is released, so a callback that
//! reaches back into the core cannot deadlock it.
//!
//! The detector never blocks reader threads itself. At critical level it
//! only emits a slow-down signal counter; honoring it is the consumer's
//! job.

use crate::metrics::{PositionMetrics, STORE_CONTAINERS, STORE_FILES};
use parking_lot::Mutex;
use skiff_core::{BackpressureConfig, Clock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Update/save counters shared between the buffer manager (writer) and
/// the detector (reader).
#[derive(Debug, Default)]
pub struct RateCounters {
    pub file_updates: AtomicU64,
    pub container_updates: AtomicU64,
    pub saves: AtomicU64,
}

impl RateCounters {
    pub fn total_updates(&self) -> u64 {
        self.file_updates.load(Ordering::Relaxed) + self.container_updates.load(Ordering::Relaxed)
    }
}

/// Pressure classification, ordered from calm to critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BackpressureLevel {
    None,
    Low,
    High,
    Critical,
}

impl BackpressureLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackpressureLevel::None => "none",
            BackpressureLevel::Low => "low",
            BackpressureLevel::High => "high",
            BackpressureLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for BackpressureLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

type FlushCallback = Arc<dyn Fn() + Send + Sync>;

struct DetectorState {
    last_check: Instant,
    last_file_updates: u64,
    last_container_updates: u64,
    last_saves: u64,
    level: BackpressureLevel,
    score: f64,
    queue_utilization: Option<f64>,
}

/// Periodic backpressure evaluator.
pub struct BackpressureDetector<C: Clock> {
    config: BackpressureConfig,
    rates: Arc<RateCounters>,
    metrics: Arc<PositionMetrics>,
    clock: C,
    state: Mutex<DetectorState>,
    flush_callback: Mutex<Option<FlushCallback>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Clock> BackpressureDetector<C> {
    pub fn new(
        config: BackpressureConfig,
        rates: Arc<RateCounters>,
        metrics: Arc<PositionMetrics>,
        clock: C,
    ) -> Self {
        let last_check = clock.now();
        Self {
            config,
            rates,
            metrics,
            clock,
            state: Mutex::new(DetectorState {
                last_check,
                last_file_updates: 0,
                last_container_updates: 0,
                last_saves: 0,
                level: BackpressureLevel::None,
                score: 0.0,
                queue_utilization: None,
            }),
            flush_callback: Mutex::new(None),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Register the flush invoked on elevated pressure. Typically wired
    /// to the buffer manager's manual flush.
    pub fn register_flush_callback(&self, callback: FlushCallback) {
        *self.flush_callback.lock() = Some(callback);
    }

    /// Queue utilization in [0,1] reported by a downstream collaborator.
    pub fn set_queue_utilization(&self, utilization: f64) {
        self.state.lock().queue_utilization = Some(utilization.clamp(0.0, 1.0));
    }

    pub fn level(&self) -> BackpressureLevel {
        self.state.lock().level
    }

    pub fn score(&self) -> f64 {
        self.state.lock().score
    }

    /// Run one evaluation cycle.
    ///
    /// The decision is taken under the state lock, then the lock is
    /// dropped before any action runs.
    pub fn evaluate(&self) {
        let Some(outcome) = self.evaluate_locked() else {
            return;
        };

        if outcome.entered_elevated {
            self.metrics.backpressure_events.with_label_values(&[outcome.level.as_str()]).inc();
            tracing::warn!(
                level = %outcome.level,
                score = outcome.score,
                update_rate = outcome.update_rate,
                save_rate = outcome.save_rate,
                "backpressure level raised"
            );
        }

        if outcome.should_flush {
            let callback = self.flush_callback.lock().clone();
            if let Some(callback) = callback {
                callback();
            }
        }

        if outcome.should_slow_down {
            self.metrics.slow_down_signal.inc();
            tracing::warn!(score = outcome.score, "signalling consumers to slow down");
        }
    }

    fn evaluate_locked(&self) -> Option<EvalOutcome> {
        let mut state = self.state.lock();

        let now = self.clock.now();
        let elapsed = now.duration_since(state.last_check).as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }

        let file_updates = self.rates.file_updates.load(Ordering::Relaxed);
        let container_updates = self.rates.container_updates.load(Ordering::Relaxed);
        let saves = self.rates.saves.load(Ordering::Relaxed);

        let file_rate = (file_updates - state.last_file_updates) as f64 / elapsed;
        let container_rate = (container_updates - state.last_container_updates) as f64 / elapsed;
        let update_rate = file_rate + container_rate;
        let save_rate = (saves - state.last_saves) as f64 / elapsed;

        state.last_check = now;
        state.last_file_updates = file_updates;
        state.last_container_updates = container_updates;
        state.last_saves = saves;

        let score = compute_score(update_rate, save_rate, state.queue_utilization);
        let level = self.classify(score);
        let previous = state.level;
        state.level = level;
        state.score = score;
        drop(state);

        self.metrics.backpressure_score.set(score);
        self.metrics.update_rate.with_label_values(&[STORE_FILES]).set(file_rate);
        self.metrics.update_rate.with_label_values(&[STORE_CONTAINERS]).set(container_rate);

        let entered_elevated = level != previous
            && matches!(level, BackpressureLevel::High | BackpressureLevel::Critical);
        let should_flush = match level {
            BackpressureLevel::High => self.config.auto_flush_on_high,
            BackpressureLevel::Critical => self.config.auto_flush_on_critical,
            _ => false,
        };
        let should_slow_down =
            level == BackpressureLevel::Critical && self.config.slow_down_on_critical;

        Some(EvalOutcome {
            level,
            score,
            update_rate,
            save_rate,
            entered_elevated,
            should_flush,
            should_slow_down,
        })
    }

    fn classify(&self, score: f64) -> BackpressureLevel {
        if score >= self.config.critical_threshold {
            BackpressureLevel::Critical
        } else if score >= self.config.high_threshold {
            BackpressureLevel::High
        } else if score >= self.config.low_threshold {
            BackpressureLevel::Low
        } else {
            BackpressureLevel::None
        }
    }

    /// Spawn the periodic evaluation task.
    pub fn start(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.check_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let detector = Arc::clone(&self);
        let cancel = self.cancel.clone();
        let task = tokio::spawn(async move {
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => detector.evaluate(),
                }
            }
        });
        *self.task.lock() = Some(task);
    }

    /// Cancel and join the evaluation task.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

struct EvalOutcome {
    level: BackpressureLevel,
    score: f64,
    update_rate: f64,
    save_rate: f64,
    entered_elevated: bool,
    should_flush: bool,
    should_slow_down: bool,
}

/// Score in [0,1]: the worst of queue utilization, the update/save
/// ratio, and the absolute update rate.
fn compute_score(update_rate: f64, save_rate: f64, queue_utilization: Option<f64>) -> f64 {
    let mut score: f64 = 0.0;

    if let Some(utilization) = queue_utilization {
        score = score.max(utilization.clamp(0.0, 1.0));
    }

    if save_rate > 0.0 {
        let ratio = update_rate / save_rate;
        if ratio > 1.0 {
            score = score.max(((ratio - 1.0) / 2.0).clamp(0.0, 1.0));
        }
    }

    if update_rate > 1_000.0 {
        score = score.max(((update_rate - 1_000.0) / 5_000.0).clamp(0.0, 1.0));
    }

    score
}

#[cfg(test)]
#[path = "backpressure_tests.rs"]
mod tests;
