//! Handoff latency and success tracking.
//!
//! Latencies live in a bounded ring buffer; the success rate covers the whole
//! process lifetime and is updated incrementally, so no outcome history is
//! stored.

use std::collections::VecDeque;

use serde::Serialize;

use baton_core::SchedulerConfig;

/// Point-in-time view of the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Mean of the latencies currently in the window; 0 before any record.
    pub average_latency_ms: f64,
    /// Lifetime success rate; 100 before any record.
    pub success_rate_pct: f64,
    pub total_count: u64,
    pub target_latency_ms: f64,
    /// Relative gain over the baseline latency, in percent.
    pub improvement_pct: f64,
}

#[derive(Debug, Clone)]
pub struct MetricsTracker {
    latencies: VecDeque<u64>,
    capacity: usize,
    total_count: u64,
    success_rate_pct: f64,
    average_latency_ms: f64,
    baseline_latency_ms: f64,
    target_latency_ms: f64,
}

impl MetricsTracker {
    pub fn new(capacity: usize, baseline_latency_ms: f64, target_latency_ms: f64) -> Self {
        let capacity = capacity.max(1);
        Self {
            latencies: VecDeque::with_capacity(capacity),
            capacity,
            total_count: 0,
            success_rate_pct: 100.0,
            average_latency_ms: 0.0,
            baseline_latency_ms,
            target_latency_ms,
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(
            config.latency_window,
            config.baseline_latency_ms,
            config.target_latency_ms,
        )
    }

    /// Record one handoff outcome.
    #[allow(clippy::cast_precision_loss)]
    pub fn record(&mut self, latency_ms: u64, success: bool) {
        if self.latencies.len() == self.capacity {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency_ms);

        self.total_count += 1;

        // Prior rate stands for `total_count - 1` observations.
        let n = self.total_count as f64;
        let outcome = if success { 100.0 } else { 0.0 };
        self.success_rate_pct = self.success_rate_pct.mul_add(n - 1.0, outcome) / n;

        let sum: u64 = self.latencies.iter().sum();
        self.average_latency_ms = sum as f64 / self.latencies.len() as f64;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let improvement_pct = if self.baseline_latency_ms > 0.0 {
            (self.baseline_latency_ms - self.average_latency_ms) / self.baseline_latency_ms * 100.0
        } else {
            0.0
        };
        MetricsSnapshot {
            average_latency_ms: self.average_latency_ms,
            success_rate_pct: self.success_rate_pct,
            total_count: self.total_count,
            target_latency_ms: self.target_latency_ms,
            improvement_pct,
        }
    }

    /// Number of latencies currently held.
    pub fn window_len(&self) -> usize {
        self.latencies.len()
    }

    /// Latencies in the window, oldest first.
    pub fn latencies(&self) -> impl Iterator<Item = u64> + '_ {
        self.latencies.iter().copied()
    }

    pub const fn total_count(&self) -> u64 {
        self.total_count
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}
