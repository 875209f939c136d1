//! Shared test doubles: a scripted capture backend, a static discovery, and
//! small helpers. Device behavior is scripted per open attempt so worker and
//! orchestrator lifecycles play out deterministically on virtual time.

#![allow(dead_code)]

use omnicam_capture::{
    BackendVariant, CaptureBackend, CaptureHandle, DeviceDescriptor, DeviceDiscovery,
    DiscoveredDevice, RawFrame, StreamSettings, VideoFrame,
};
use omnicam_foundation::{SourceError, TestClock};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub enum Tail {
    ErrorsForever,
    FramesForever,
}

/// One open attempt's worth of behavior.
#[derive(Clone)]
pub enum SessionPlan {
    FailOpen,
    Stream { reads: Vec<bool>, tail: Tail },
    /// Frames while the gate is open, read errors once it closes.
    Gated { gate: Arc<AtomicBool> },
}

impl SessionPlan {
    pub fn frames_then_errors(n: usize) -> Self {
        SessionPlan::Stream {
            reads: vec![true; n],
            tail: Tail::ErrorsForever,
        }
    }

    pub fn endless() -> Self {
        SessionPlan::Stream {
            reads: Vec::new(),
            tail: Tail::FramesForever,
        }
    }
}

#[derive(Default)]
pub struct DeviceCounters {
    pub opens: AtomicU32,
    pub open_successes: AtomicU32,
    pub releases: AtomicU32,
    pub reads_ok: AtomicU32,
    pub reads_err: AtomicU32,
}

struct DeviceScript {
    sessions: VecDeque<SessionPlan>,
    counters: Arc<DeviceCounters>,
}

/// Capture backend whose devices follow per-open scripts. Open attempts on
/// devices with an exhausted (or missing) script fail.
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: Mutex<HashMap<DeviceDescriptor, DeviceScript>>,
    seq: Arc<AtomicU32>,
    frame_advance: Option<(Arc<TestClock>, Duration)>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the given virtual clock by `step` on every successful read,
    /// simulating streaming time passing.
    pub fn with_frame_advance(mut self, clock: Arc<TestClock>, step: Duration) -> Self {
        self.frame_advance = Some((clock, step));
        self
    }

    pub fn script(
        &self,
        descriptor: DeviceDescriptor,
        sessions: Vec<SessionPlan>,
    ) -> Arc<DeviceCounters> {
        let counters = Arc::new(DeviceCounters::default());
        self.scripts.lock().insert(
            descriptor,
            DeviceScript {
                sessions: sessions.into(),
                counters: Arc::clone(&counters),
            },
        );
        counters
    }
}

impl CaptureBackend for ScriptedBackend {
    fn open(
        &self,
        descriptor: &DeviceDescriptor,
        _variant: BackendVariant,
    ) -> Result<Box<dyn CaptureHandle>, SourceError> {
        let mut scripts = self.scripts.lock();
        let Some(script) = scripts.get_mut(descriptor) else {
            return Err(SourceError::Open("unscripted device".into()));
        };
        script.counters.opens.fetch_add(1, Ordering::SeqCst);

        match script.sessions.pop_front() {
            None | Some(SessionPlan::FailOpen) => {
                Err(SourceError::Open("scripted open failure".into()))
            }
            Some(SessionPlan::Stream { reads, tail }) => {
                script.counters.open_successes.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(ScriptedHandle {
                    reads: reads.into(),
                    tail,
                    gate: None,
                    counters: Arc::clone(&script.counters),
                    seq: Arc::clone(&self.seq),
                    frame_advance: self.frame_advance.clone(),
                }))
            }
            Some(SessionPlan::Gated { gate }) => {
                script.counters.open_successes.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(ScriptedHandle {
                    reads: VecDeque::new(),
                    tail: Tail::ErrorsForever,
                    gate: Some(gate),
                    counters: Arc::clone(&script.counters),
                    seq: Arc::clone(&self.seq),
                    frame_advance: self.frame_advance.clone(),
                }))
            }
        }
    }
}

struct ScriptedHandle {
    reads: VecDeque<bool>,
    tail: Tail,
    gate: Option<Arc<AtomicBool>>,
    counters: Arc<DeviceCounters>,
    seq: Arc<AtomicU32>,
    frame_advance: Option<(Arc<TestClock>, Duration)>,
}

impl CaptureHandle for ScriptedHandle {
    fn configure(&mut self, _settings: &StreamSettings) -> Result<(), SourceError> {
        Ok(())
    }

    fn read(&mut self) -> Result<RawFrame, SourceError> {
        let ok = match &self.gate {
            Some(gate) => gate.load(Ordering::SeqCst),
            None => self
                .reads
                .pop_front()
                .unwrap_or(matches!(self.tail, Tail::FramesForever)),
        };

        if ok {
            // Pace like a driver blocking until the next frame arrives.
            std::thread::sleep(Duration::from_millis(1));
            if let Some((clock, step)) = &self.frame_advance {
                clock.advance(*step);
            }
            self.counters.reads_ok.fetch_add(1, Ordering::SeqCst);
            let seq = self.seq.fetch_add(1, Ordering::SeqCst);
            Ok(RawFrame {
                pixels: vec![(seq & 0xff) as u8, ((seq >> 8) & 0xff) as u8, 0],
                width: 1,
                height: 1,
            })
        } else {
            self.counters.reads_err.fetch_add(1, Ordering::SeqCst);
            Err(SourceError::Io("scripted read failure".into()))
        }
    }

    fn release(&mut self) {
        self.counters.releases.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct StaticDiscovery(pub Vec<DiscoveredDevice>);

impl DeviceDiscovery for StaticDiscovery {
    fn list_devices(&self) -> Vec<DiscoveredDevice> {
        self.0.clone()
    }
}

/// URI descriptors keep the backend-variant candidate list at exactly one
/// entry on every platform, so each Opening attempt consumes one session.
pub fn uri_device(id: u32) -> DiscoveredDevice {
    DiscoveredDevice {
        id,
        descriptor: DeviceDescriptor::Uri(format!("rtsp://cam/{}", id)),
    }
}

/// Global sequence number baked into a scripted frame's pixels.
pub fn frame_seq(frame: &VideoFrame) -> u32 {
    frame.pixels[0] as u32 | ((frame.pixels[1] as u32) << 8)
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
