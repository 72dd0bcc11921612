// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Prometheus metrics for the position persistence core.
//!
//! All collectors are registered once against the injected registry at
//! construction; after that, emission is infallible and cheap. Data
//! operations never fail because of a metric. Names follow prometheus
//! conventions: `_total` for counters, `_seconds`/`_bytes` for units.

use prometheus::{
    Gauge, GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};

/// Label value for the file position store
pub const STORE_FILES: &str = "files";

/// Label value for the container position store
pub const STORE_CONTAINERS: &str = "containers";

/// Metrics surface updated by every layer of the core.
pub struct PositionMetrics {
    pub save_success: IntCounter,
    pub save_failure: IntCounter,
    pub rotation: IntCounterVec,
    pub truncation: IntCounterVec,
    pub flush_trigger: IntCounterVec,
    pub checkpoint_created: IntCounter,
    pub checkpoint_restore: IntCounterVec,
    pub backpressure_events: IntCounterVec,
    pub slow_down_signal: IntCounter,
    pub positions_dropped: IntCounter,

    pub lag_seconds: GaugeVec,
    pub backpressure_score: Gauge,
    pub update_rate: GaugeVec,
    pub memory_usage: IntGauge,
    pub file_size: IntGaugeVec,
    pub active_by_status: IntGaugeVec,
    pub checkpoint_size: IntGauge,
    pub checkpoint_age: Gauge,
    pub checkpoint_health: IntGaugeVec,

    pub lag_distribution: HistogramVec,
}

impl PositionMetrics {
    /// Create and register every collector against `registry`.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let save_success =
            IntCounter::new("position_save_success_total", "Successful state file saves")?;
        let save_failure =
            IntCounter::new("position_save_failure_total", "Failed state file saves")?;
        let rotation = IntCounterVec::new(
            Opts::new("position_rotation_total", "File rotations detected"),
            &["path"],
        )?;
        let truncation = IntCounterVec::new(
            Opts::new("position_truncation_total", "File truncations detected"),
            &["path"],
        )?;
        let flush_trigger = IntCounterVec::new(
            Opts::new("position_flush_trigger_total", "Flushes by trigger"),
            &["trigger"],
        )?;
        let checkpoint_created =
            IntCounter::new("position_checkpoint_created_total", "Checkpoints created")?;
        let checkpoint_restore = IntCounterVec::new(
            Opts::new("position_checkpoint_restore_total", "Checkpoint restore attempts"),
            &["outcome"],
        )?;
        let backpressure_events = IntCounterVec::new(
            Opts::new("position_backpressure_events_total", "Transitions into elevated levels"),
            &["level"],
        )?;
        let slow_down_signal = IntCounter::new(
            "position_slow_down_signal_total",
            "Slow-down signals emitted at critical backpressure",
        )?;
        let positions_dropped = IntCounter::new(
            "position_dropped_total",
            "Updates dropped because the memory cap was hit",
        )?;

        let lag_seconds = GaugeVec::new(
            Opts::new("position_lag_seconds", "Seconds since last successful save"),
            &["store"],
        )?;
        let backpressure_score =
            Gauge::new("position_backpressure_score", "Current backpressure score in [0,1]")?;
        let update_rate = GaugeVec::new(
            Opts::new("position_update_rate", "Position updates per second"),
            &["store"],
        )?;
        let memory_usage = IntGauge::new(
            "position_memory_usage_bytes",
            "Estimated bytes held by in-memory positions",
        )?;
        let file_size = IntGaugeVec::new(
            Opts::new("position_file_size_bytes", "Size of the persisted state file"),
            &["store"],
        )?;
        let active_by_status = IntGaugeVec::new(
            Opts::new("position_active_by_status", "Tracked positions by lifecycle status"),
            &["status"],
        )?;
        let checkpoint_size =
            IntGauge::new("checkpoint_size_bytes", "Size of the newest checkpoint")?;
        let checkpoint_age =
            Gauge::new("checkpoint_age_seconds", "Seconds since the newest checkpoint")?;
        let checkpoint_health = IntGaugeVec::new(
            Opts::new("checkpoint_health", "1 when the subsystem is healthy"),
            &["subsystem"],
        )?;

        let lag_distribution = HistogramVec::new(
            HistogramOpts::new("position_lag_distribution_seconds", "Distribution of save lag")
                .buckets(prometheus::exponential_buckets(0.1, 2.0, 12)?),
            &["store"],
        )?;

        let metrics = Self {
            save_success,
            save_failure,
            rotation,
            truncation,
            flush_trigger,
            checkpoint_created,
            checkpoint_restore,
            backpressure_events,
            slow_down_signal,
            positions_dropped,
            lag_seconds,
            backpressure_score,
            update_rate,
            memory_usage,
            file_size,
            active_by_status,
            checkpoint_size,
            checkpoint_age,
            checkpoint_health,
            lag_distribution,
        };

        registry.register(Box::new(metrics.save_success.clone()))?;
        registry.register(Box::new(metrics.save_failure.clone()))?;
        registry.register(Box::new(metrics.rotation.clone()))?;
        registry.register(Box::new(metrics.truncation.clone()))?;
        registry.register(Box::new(metrics.flush_trigger.clone()))?;
        registry.register(Box::new(metrics.checkpoint_created.clone()))?;
        registry.register(Box::new(metrics.checkpoint_restore.clone()))?;
        registry.register(Box::new(metrics.backpressure_events.clone()))?;
        registry.register(Box::new(metrics.slow_down_signal.clone()))?;
        registry.register(Box::new(metrics.positions_dropped.clone()))?;
        registry.register(Box::new(metrics.lag_seconds.clone()))?;
        registry.register(Box::new(metrics.backpressure_score.clone()))?;
        registry.register(Box::new(metrics.update_rate.clone()))?;
        registry.register(Box::new(metrics.memory_usage.clone()))?;
        registry.register(Box::new(metrics.file_size.clone()))?;
        registry.register(Box::new(metrics.active_by_status.clone()))?;
        registry.register(Box::new(metrics.checkpoint_size.clone()))?;
        registry.register(Box::new(metrics.checkpoint_age.clone()))?;
        registry.register(Box::new(metrics.checkpoint_health.clone()))?;
        registry.register(Box::new(metrics.lag_distribution.clone()))?;

        Ok(metrics)
    }

    pub(crate) fn record_rotation(&self, path: &str) {
        self.rotation.with_label_values(&[path]).inc();
    }

    pub(crate) fn record_truncation(&self, path: &str) {
        self.truncation.with_label_values(&[path]).inc();
    }

    pub(crate) fn record_save_success(&self, store: &str) {
        self.save_success.inc();
        self.lag_seconds.with_label_values(&[store]).set(0.0);
    }

    pub(crate) fn record_save_failure(&self) {
        self.save_failure.inc();
    }

    pub(crate) fn record_flush_trigger(&self, trigger: &str) {
        self.flush_trigger.with_label_values(&[trigger]).inc();
    }

    pub(crate) fn record_checkpoint_restore(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.checkpoint_restore.with_label_values(&[outcome]).inc();
    }

    pub(crate) fn observe_lag(&self, store: &str, seconds: f64) {
        self.lag_seconds.with_label_values(&[store]).set(seconds);
        self.lag_distribution.with_label_values(&[store]).observe(seconds);
    }

    pub(crate) fn set_checkpoint_health(&self, healthy: bool) {
        self.checkpoint_health
            .with_label_values(&["checkpoint"])
            .set(if healthy { 1 } else { 0 });
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
