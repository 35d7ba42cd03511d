//! Dispatch counters and periodic gauge emission.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Thread-safe lifetime counters for the dispatcher.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    retried: AtomicU64,
    total_execution_ms: AtomicU64,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self, elapsed: Duration) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.total_execution_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let submitted = self.submitted.load(Ordering::Relaxed);
        let completed = self.completed.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let timed_out = self.timed_out.load(Ordering::Relaxed);
        let cancelled = self.cancelled.load(Ordering::Relaxed);
        let retried = self.retried.load(Ordering::Relaxed);
        let total_ms = self.total_execution_ms.load(Ordering::Relaxed);

        let finished = completed + failed + timed_out;
        MetricsSnapshot {
            submitted,
            completed,
            failed,
            timed_out,
            cancelled,
            retried,
            success_rate: if finished > 0 {
                completed as f64 / finished as f64
            } else {
                0.0
            },
            avg_execution_ms: if completed > 0 {
                total_ms / completed
            } else {
                0
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsSnapshot {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub retried: u64,
    pub success_rate: f64,
    pub avg_execution_ms: u64,
}

/// Gauge values pushed to the external metrics sink on each maintenance
/// tick.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SystemGauges {
    pub total_agents: usize,
    pub active_agents: usize,
    pub pending_tasks: usize,
    pub active_tasks: usize,
    pub completed_tasks: usize,
}

/// External metrics collector hook. Default implementation drops the
/// gauges.
pub trait MetricsSink: Send + Sync {
    fn record_gauges(&self, _gauges: SystemGauges) {}
}

/// Discards every gauge.
#[derive(Debug, Default)]
pub struct NullMetricsSink;

impl MetricsSink for NullMetricsSink {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_snapshot() {
        let metrics = DispatchMetrics::new();
        metrics.record_submitted();
        metrics.record_submitted();
        metrics.record_completed(Duration::from_millis(100));
        metrics.record_failed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.submitted, 2);
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.avg_execution_ms, 100);
        assert!((snapshot.success_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_snapshot_rates() {
        let snapshot = DispatchMetrics::new().snapshot();
        assert_eq!(snapshot.success_rate, 0.0);
        assert_eq!(snapshot.avg_execution_ms, 0);
    }

    #[test]
    fn test_avg_over_multiple_completions() {
        let metrics = DispatchMetrics::new();
        metrics.record_completed(Duration::from_millis(100));
        metrics.record_completed(Duration::from_millis(300));

        assert_eq!(metrics.snapshot().avg_execution_ms, 200);
    }
}
