//! The frame bus: a bounded many-writer/one-reader channel plus the
//! drain-side freshness cache that bridges brief per-device gaps.

use crate::metrics::CaptureMetrics;
use crate::{DeviceId, VideoFrame};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

pub struct FrameBus;

impl FrameBus {
    /// Builds the bus. Capacity should be about twice the maximum device
    /// count so one slow drain cycle does not immediately cost frames.
    pub fn new(capacity: usize, metrics: CaptureMetrics) -> (FrameSender, FrameDrain) {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        let sender = FrameSender {
            tx,
            rx: rx.clone(),
            metrics: metrics.clone(),
        };
        let drain = FrameDrain {
            rx,
            cache: HashMap::new(),
            metrics,
        };
        (sender, drain)
    }
}

/// Producer half, cloned into every capture worker. Pushes never block:
/// a full bus sheds its oldest frame to make room for the newest.
#[derive(Clone)]
pub struct FrameSender {
    tx: Sender<VideoFrame>,
    rx: Receiver<VideoFrame>,
    metrics: CaptureMetrics,
}

impl FrameSender {
    pub fn push(&self, frame: VideoFrame) {
        use std::sync::atomic::Ordering;

        match self.tx.try_send(frame) {
            Ok(()) => {
                self.metrics.frames_captured.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(frame)) => {
                // Drop-oldest: shed one queued frame, then retry once. If the
                // bus refilled in between, the new frame is the one dropped.
                let _ = self.rx.try_recv();
                self.metrics.frames_dropped.fetch_add(1, Ordering::Relaxed);
                match self.tx.try_send(frame) {
                    Ok(()) => {
                        self.metrics.frames_captured.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(_) => {
                        self.metrics.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                // Consumer gone: shutdown is in progress, nothing to do.
            }
        }
    }
}

/// Consumer half, owned by the orchestrator's drain loop. The freshness
/// cache is written here and nowhere else.
pub struct FrameDrain {
    rx: Receiver<VideoFrame>,
    cache: HashMap<DeviceId, VideoFrame>,
    metrics: CaptureMetrics,
}

impl FrameDrain {
    /// Pops the bus until empty, in arrival order, recording every frame in
    /// the cache on the way out.
    pub fn drain(&mut self) -> Vec<VideoFrame> {
        let mut drained = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            self.cache.insert(frame.device_id, frame.clone());
            drained.push(frame);
        }
        drained
    }

    /// Synthesizes cached frames into `frames` for live devices that were
    /// silent this cycle but produced something within the freshness window.
    /// Entries for dead devices and stale entries are evicted on the way.
    pub fn merge_fresh(
        &mut self,
        frames: &mut HashMap<DeviceId, VideoFrame>,
        live: &HashSet<DeviceId>,
        now: Instant,
        freshness_window: Duration,
    ) {
        use std::sync::atomic::Ordering;

        self.cache.retain(|id, frame| {
            live.contains(id) && now.duration_since(frame.timestamp) < freshness_window
        });

        for (id, frame) in &self.cache {
            if !frames.contains_key(id) {
                frames.insert(*id, frame.clone());
                self.metrics
                    .frames_cached_served
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn cached_devices(&self) -> Vec<DeviceId> {
        self.cache.keys().copied().collect()
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn frame(device_id: DeviceId, seq: u8, timestamp: Instant) -> VideoFrame {
        VideoFrame {
            device_id,
            pixels: Arc::from(vec![seq; 4]),
            width: 2,
            height: 2,
            timestamp,
        }
    }

    #[test]
    fn drain_preserves_arrival_order() {
        let (sender, mut drain) = FrameBus::new(8, CaptureMetrics::new());
        let now = Instant::now();
        for seq in 0..5 {
            sender.push(frame(0, seq, now));
        }
        let drained = drain.drain();
        let seqs: Vec<u8> = drained.iter().map(|f| f.pixels[0]).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn full_bus_sheds_oldest_frame() {
        let metrics = CaptureMetrics::new();
        let (sender, mut drain) = FrameBus::new(2, metrics.clone());
        let now = Instant::now();
        sender.push(frame(0, 1, now));
        sender.push(frame(0, 2, now));
        sender.push(frame(0, 3, now));

        let seqs: Vec<u8> = drain.drain().iter().map(|f| f.pixels[0]).collect();
        assert_eq!(seqs, vec![2, 3]);
        assert_eq!(metrics.snapshot().frames_dropped, 1);
    }

    #[test]
    fn fresh_cache_entry_fills_a_silent_device() {
        let (sender, mut drain) = FrameBus::new(8, CaptureMetrics::new());
        let now = Instant::now();
        sender.push(frame(7, 1, now));
        drain.drain();

        let mut frames = HashMap::new();
        let live: HashSet<DeviceId> = [7].into_iter().collect();
        drain.merge_fresh(&mut frames, &live, now, Duration::from_secs(5));
        assert!(frames.contains_key(&7));
    }

    #[test]
    fn stale_cache_entry_is_evicted() {
        let (sender, mut drain) = FrameBus::new(8, CaptureMetrics::new());
        let captured = Instant::now();
        sender.push(frame(7, 1, captured));
        drain.drain();

        let mut frames = HashMap::new();
        let live: HashSet<DeviceId> = [7].into_iter().collect();
        let later = captured + Duration::from_secs(6);
        drain.merge_fresh(&mut frames, &live, later, Duration::from_secs(5));
        assert!(frames.is_empty());
        assert!(drain.cached_devices().is_empty());
    }

    #[test]
    fn cache_entries_for_removed_devices_are_purged() {
        let (sender, mut drain) = FrameBus::new(8, CaptureMetrics::new());
        let now = Instant::now();
        sender.push(frame(7, 1, now));
        drain.drain();

        let mut frames = HashMap::new();
        let live = HashSet::new();
        drain.merge_fresh(&mut frames, &live, now, Duration::from_secs(5));
        assert!(frames.is_empty());
        assert!(drain.cached_devices().is_empty());
    }

    #[test]
    fn live_frame_wins_over_cache() {
        let (sender, mut drain) = FrameBus::new(8, CaptureMetrics::new());
        let now = Instant::now();
        sender.push(frame(7, 1, now));
        drain.drain();

        sender.push(frame(7, 2, now));
        let drained = drain.drain();
        let mut frames: HashMap<DeviceId, VideoFrame> =
            drained.into_iter().map(|f| (f.device_id, f)).collect();

        let live: HashSet<DeviceId> = [7].into_iter().collect();
        drain.merge_fresh(&mut frames, &live, now, Duration::from_secs(5));
        assert_eq!(frames[&7].pixels[0], 2);
    }
}
