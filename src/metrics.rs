// src/metrics.rs
//
// Production observability. Counter handles are cloned into every stream
// worker and the registry task; all updates are relaxed atomics so the hot
// tracking path never takes a lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct EngineMetrics {
    pub frames_processed: Arc<AtomicU64>,
    pub detections_dropped: Arc<AtomicU64>,
    pub tracks_spawned: Arc<AtomicU64>,
    pub tracks_evicted: Arc<AtomicU64>,
    pub predictions_emitted: Arc<AtomicU64>,
    pub handoffs_confirmed: Arc<AtomicU64>,
    pub predictions_expired: Arc<AtomicU64>,
    pub snapshots_published: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            frames_processed: Arc::new(AtomicU64::new(0)),
            detections_dropped: Arc::new(AtomicU64::new(0)),
            tracks_spawned: Arc::new(AtomicU64::new(0)),
            tracks_evicted: Arc::new(AtomicU64::new(0)),
            predictions_emitted: Arc::new(AtomicU64::new(0)),
            handoffs_confirmed: Arc::new(AtomicU64::new(0)),
            predictions_expired: Arc::new(AtomicU64::new(0)),
            snapshots_published: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f64 {
        let frames = self.frames_processed.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            fps: self.fps(),
            detections_dropped: self.detections_dropped.load(Ordering::Relaxed),
            tracks_spawned: self.tracks_spawned.load(Ordering::Relaxed),
            tracks_evicted: self.tracks_evicted.load(Ordering::Relaxed),
            predictions_emitted: self.predictions_emitted.load(Ordering::Relaxed),
            handoffs_confirmed: self.handoffs_confirmed.load(Ordering::Relaxed),
            predictions_expired: self.predictions_expired.load(Ordering::Relaxed),
            snapshots_published: self.snapshots_published.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub frames_processed: u64,
    pub fps: f64,
    pub detections_dropped: u64,
    pub tracks_spawned: u64,
    pub tracks_evicted: u64,
    pub predictions_emitted: u64,
    pub handoffs_confirmed: u64,
    pub predictions_expired: u64,
    pub snapshots_published: u64,
    pub elapsed_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_shared_across_clones() {
        let metrics = EngineMetrics::new();
        let worker_copy = metrics.clone();
        worker_copy.inc(&worker_copy.frames_processed);
        worker_copy.add(&worker_copy.detections_dropped, 3);
        let summary = metrics.summary();
        assert_eq!(summary.frames_processed, 1);
        assert_eq!(summary.detections_dropped, 3);
    }

    #[test]
    fn test_summary_serializes() {
        let metrics = EngineMetrics::new();
        let json = serde_json::to_string(&metrics.summary()).unwrap();
        assert!(json.contains("handoffs_confirmed"));
    }
}
