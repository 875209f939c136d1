use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared counters for cross-thread pipeline monitoring. Cloning is cheap;
/// every clone observes the same values.
#[derive(Clone, Default)]
pub struct CaptureMetrics {
    pub frames_captured: Arc<AtomicU64>,
    pub frames_dropped: Arc<AtomicU64>,
    pub frames_cached_served: Arc<AtomicU64>,
    pub open_failures: Arc<AtomicU64>,
    pub reconnections: Arc<AtomicU64>,
    pub workers_started: Arc<AtomicU64>,
    pub workers_reaped: Arc<AtomicU64>,
    pub join_timeouts: Arc<AtomicU64>,
    pub callback_panics: Arc<AtomicU64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_captured: u64,
    pub frames_dropped: u64,
    pub frames_cached_served: u64,
    pub open_failures: u64,
    pub reconnections: u64,
    pub workers_started: u64,
    pub workers_reaped: u64,
    pub join_timeouts: u64,
    pub callback_panics: u64,
}

impl CaptureMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_cached_served: self.frames_cached_served.load(Ordering::Relaxed),
            open_failures: self.open_failures.load(Ordering::Relaxed),
            reconnections: self.reconnections.load(Ordering::Relaxed),
            workers_started: self.workers_started.load(Ordering::Relaxed),
            workers_reaped: self.workers_reaped.load(Ordering::Relaxed),
            join_timeouts: self.join_timeouts.load(Ordering::Relaxed),
            callback_panics: self.callback_panics.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_counters() {
        let metrics = CaptureMetrics::new();
        let clone = metrics.clone();
        clone.frames_captured.fetch_add(3, Ordering::Relaxed);
        assert_eq!(metrics.snapshot().frames_captured, 3);
    }
}
