// src/pipeline/metrics.rs
//
// Run observability. Counts events and buckets as the pipeline moves,
// exported as a summary snapshot at run end.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub events_processed: Arc<AtomicU64>,
    pub buckets_emitted: Arc<AtomicU64>,
    pub empty_buckets: Arc<AtomicU64>,
    pub buckets_skipped: Arc<AtomicU64>,
    pub unknown_routed: Arc<AtomicU64>,
    pub peak_bucket_total: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            events_processed: Arc::new(AtomicU64::new(0)),
            buckets_emitted: Arc::new(AtomicU64::new(0)),
            empty_buckets: Arc::new(AtomicU64::new(0)),
            buckets_skipped: Arc::new(AtomicU64::new(0)),
            unknown_routed: Arc::new(AtomicU64::new(0)),
            peak_bucket_total: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    pub fn observe_bucket_total(&self, total: u64) {
        self.peak_bucket_total.fetch_max(total, Ordering::Relaxed);
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            buckets_emitted: self.buckets_emitted.load(Ordering::Relaxed),
            empty_buckets: self.empty_buckets.load(Ordering::Relaxed),
            buckets_skipped: self.buckets_skipped.load(Ordering::Relaxed),
            unknown_routed: self.unknown_routed.load(Ordering::Relaxed),
            peak_bucket_total: self.peak_bucket_total.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub events_processed: u64,
    pub buckets_emitted: u64,
    pub empty_buckets: u64,
    pub buckets_skipped: u64,
    pub unknown_routed: u64,
    pub peak_bucket_total: u64,
    pub elapsed_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = PipelineMetrics::new();
        metrics.inc(&metrics.buckets_emitted);
        metrics.inc(&metrics.buckets_emitted);
        metrics.add(&metrics.events_processed, 5);
        metrics.observe_bucket_total(3);
        metrics.observe_bucket_total(9);
        metrics.observe_bucket_total(4);

        let summary = metrics.summary();
        assert_eq!(summary.buckets_emitted, 2);
        assert_eq!(summary.events_processed, 5);
        assert_eq!(summary.peak_bucket_total, 9);
    }
}
