use serde::Serialize;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

#[derive(Debug, Default)]
struct InnerMetrics {
    offsets_processed: AtomicU64,
    offsets_skipped: AtomicU64,
    failure_count: AtomicU64,
    retry_count: AtomicU64,
    integrity_failures: AtomicU64,
}

/// Counters shared by every task the engine runs.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<InnerMetrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub offsets_processed: u64,
    pub offsets_skipped: u64,
    pub failure_count: u64,
    pub retry_count: u64,
    pub integrity_failures: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            inner: Arc::new(InnerMetrics::default()),
        }
    }

    pub fn increment_processed(&self, count: u64) {
        self.inner
            .offsets_processed
            .fetch_add(count, Ordering::Relaxed);
    }

    /// Offsets a rerun did not resubmit because they were already recorded.
    pub fn increment_skipped(&self, count: u64) {
        self.inner.offsets_skipped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_failures(&self, count: u64) {
        self.inner.failure_count.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_retries(&self, count: u64) {
        self.inner.retry_count.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_integrity_failures(&self, count: u64) {
        self.inner
            .integrity_failures
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            offsets_processed: self.inner.offsets_processed.load(Ordering::Relaxed),
            offsets_skipped: self.inner.offsets_skipped.load(Ordering::Relaxed),
            failure_count: self.inner.failure_count.load(Ordering::Relaxed),
            retry_count: self.inner.retry_count.load(Ordering::Relaxed),
            integrity_failures: self.inner.integrity_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_counters() {
        let metrics = Metrics::new();
        let other = metrics.clone();
        metrics.increment_processed(3);
        other.increment_failures(1);
        other.increment_integrity_failures(2);

        let snap = metrics.snapshot();
        assert_eq!(snap.offsets_processed, 3);
        assert_eq!(snap.failure_count, 1);
        assert_eq!(snap.integrity_failures, 2);
        assert_eq!(snap.retry_count, 0);
    }
}
