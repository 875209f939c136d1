//! The orchestrator: reconciles discovery output against live workers once
//! per monitor tick, drains the frame bus from the consumer context, and
//! keeps display surfaces aligned with the current frame map.
//!
//! Locking discipline: the device table is the only state shared between the
//! monitor thread and the consumer context. The lock is held for table
//! mutation and snapshots only, never across device I/O, worker joins, or
//! display calls.

use crate::bus::{FrameBus, FrameDrain, FrameSender};
use crate::config::{CaptureConfig, DeviceClass, RunMode};
use crate::discovery::{DeviceDiscovery, DiscoveredDevice};
use crate::metrics::CaptureMetrics;
use crate::source::CaptureBackend;
use crate::window::{surface_title, DisplaySink, NullDisplay, WindowReconciler};
use crate::worker::{CaptureWorker, WorkerHandle};
use crate::{strategy, DeviceId, VideoFrame};
use omnicam_foundation::{
    real_clock, AppError, AppState, CaptureError, DeviceEvent, SharedClock, StateManager,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::broadcast;

/// Invoked synchronously from the consumer context once per drained frame.
/// Must not block for long: it delays the whole drain cycle.
pub type FrameCallback = Arc<dyn Fn(DeviceId, &VideoFrame) + Send + Sync>;

/// Per-active-device state, owned exclusively by the orchestrator. Workers
/// never see it; they only push frames onto the bus.
struct DeviceRecord {
    label: String,
    worker: WorkerHandle,
    termination_reported: bool,
}

/// Cloneable handle for requesting a stop from another thread (Ctrl-C
/// handlers, exit keys, tests).
#[derive(Clone)]
pub struct StopHandle {
    stop: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

pub struct CaptureManager {
    pub(crate) cfg: CaptureConfig,
    pub(crate) backend: Arc<dyn CaptureBackend>,
    pub(crate) discovery: Option<Box<dyn DeviceDiscovery>>,
    pub(crate) clock: SharedClock,
    pub(crate) metrics: CaptureMetrics,
    sender: FrameSender,
    drain: FrameDrain,
    devices: Arc<Mutex<HashMap<DeviceId, DeviceRecord>>>,
    pub(crate) stop: Arc<AtomicBool>,
    event_tx: broadcast::Sender<DeviceEvent>,
    pub(crate) reconciler: WindowReconciler,
    pub(crate) callback: Option<FrameCallback>,
    pub(crate) state: StateManager,
    monitor: Option<JoinHandle<()>>,
}

impl CaptureManager {
    pub fn new(
        cfg: CaptureConfig,
        backend: Arc<dyn CaptureBackend>,
        discovery: Box<dyn DeviceDiscovery>,
    ) -> Self {
        let metrics = CaptureMetrics::new();
        let (sender, drain) = FrameBus::new(cfg.bus_capacity(), metrics.clone());
        let (event_tx, _) = broadcast::channel(32);
        Self {
            cfg,
            backend,
            discovery: Some(discovery),
            clock: real_clock(),
            metrics,
            sender,
            drain,
            devices: Arc::new(Mutex::new(HashMap::new())),
            stop: Arc::new(AtomicBool::new(false)),
            event_tx,
            reconciler: WindowReconciler::new(Box::new(NullDisplay)),
            callback: None,
            state: StateManager::new(),
            monitor: None,
        }
    }

    /// Replaces the display collaborator. Call before `start`/`run`.
    pub fn with_display(mut self, sink: Box<dyn DisplaySink>) -> Self {
        self.reconciler = WindowReconciler::new(sink);
        self
    }

    /// Replaces the clock (virtual time in tests). Call before `start`/`run`.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_frame_callback(mut self, callback: FrameCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn events(&self) -> broadcast::Receiver<DeviceEvent> {
        self.event_tx.subscribe()
    }

    pub fn metrics(&self) -> CaptureMetrics {
        self.metrics.clone()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop: Arc::clone(&self.stop),
        }
    }

    pub fn live_devices(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self.devices.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn active_surfaces(&self) -> usize {
        self.reconciler.active_surfaces()
    }

    /// Starts the monitor thread. The consumer is expected to call
    /// `poll_frames` in its own loop afterwards (or use `run`).
    pub fn start(&mut self) -> Result<(), AppError> {
        let discovery = self
            .discovery
            .take()
            .ok_or_else(|| AppError::Fatal("Capture manager already started".into()))?;
        self.state.transition(AppState::Running)?;

        let ctx = self.reconcile_ctx();
        let stop = Arc::clone(&self.stop);
        let clock = self.clock.clone();
        let interval = self.cfg.scan_interval;
        let handle = thread::Builder::new()
            .name("device-monitor".to_string())
            .spawn(move || monitor_loop(ctx, discovery, stop, interval, clock))
            .map_err(|e| {
                AppError::Fatal(format!("Failed to spawn device monitor thread: {}", e))
            })?;
        self.monitor = Some(handle);
        Ok(())
    }

    /// Runs one reconciliation pass against an externally supplied device
    /// set, without the monitor thread. Embedding and test entry point; the
    /// monitor thread goes through the same path.
    pub fn reconcile(&self, discovered: &[DiscoveredDevice]) {
        self.reconcile_ctx().reconcile(discovered);
    }

    /// One consumer iteration: drain the bus, deliver callbacks, merge fresh
    /// cached frames for silent-but-recent devices, and reconcile display
    /// surfaces. Returns the frame map for this cycle.
    pub fn poll_frames(&mut self) -> HashMap<DeviceId, VideoFrame> {
        let drained = self.drain.drain();
        let mut frames = HashMap::with_capacity(drained.len());
        for frame in drained {
            if let Some(callback) = &self.callback {
                invoke_callback(callback, &self.metrics, frame.device_id, &frame);
            }
            frames.insert(frame.device_id, frame);
        }

        let (live, titles) = {
            let devices = self.devices.lock();
            let live: HashSet<DeviceId> = devices.keys().copied().collect();
            let titles: HashMap<DeviceId, String> = devices
                .iter()
                .map(|(id, record)| {
                    (*id, surface_title(*id, self.cfg.device_class, &record.label))
                })
                .collect();
            (live, titles)
        };
        self.drain.merge_fresh(
            &mut frames,
            &live,
            self.clock.now(),
            self.cfg.frame_freshness_window,
        );

        if self.cfg.show_display {
            self.reconciler.sync(&frames, &titles);
            if let Some(key) = self.reconciler.poll_key() {
                if self.cfg.exit_keys.contains(&key) {
                    tracing::info!("Exit key pressed, stopping");
                    self.stop.store(true, Ordering::SeqCst);
                }
            }
        }

        frames
    }

    /// Runs the configured strategy until stopped, then shuts down.
    pub fn run(&mut self) -> Result<(), AppError> {
        match self.cfg.run_mode {
            RunMode::Sequential => strategy::run_sequential(self),
            RunMode::Concurrent => {
                self.start()?;
                while !self.stop.load(Ordering::Relaxed) {
                    self.poll_frames();
                    self.clock.sleep(Duration::from_millis(10));
                }
                self.stop();
                Ok(())
            }
        }
    }

    /// Cancels every worker, joins each with the bounded timeout, destroys
    /// all surfaces, and empties the table. Idempotent.
    pub fn stop(&mut self) {
        if matches!(self.state.current(), AppState::Stopped) {
            return;
        }
        let _ = self.state.transition(AppState::Stopping);
        self.stop.store(true, Ordering::SeqCst);

        if let Some(handle) = self.monitor.take() {
            let _ = handle.join();
        }

        // Cancel first so every worker winds down in parallel, then join
        // each under its own timeout bound.
        let records: Vec<(DeviceId, DeviceRecord)> = self.devices.lock().drain().collect();
        for (_, record) in &records {
            record.worker.cancel();
        }
        let ctx = self.reconcile_ctx();
        for (id, record) in records {
            ctx.reap(id, record);
        }

        self.reconciler.destroy_all();
        self.drain.clear_cache();
        let _ = self.state.transition(AppState::Stopped);
        tracing::info!("Capture manager stopped");
    }

    fn reconcile_ctx(&self) -> ReconcileCtx {
        ReconcileCtx {
            cfg: self.cfg.clone(),
            backend: Arc::clone(&self.backend),
            clock: self.clock.clone(),
            metrics: self.metrics.clone(),
            sender: self.sender.clone(),
            devices: Arc::clone(&self.devices),
            event_tx: self.event_tx.clone(),
        }
    }
}

pub(crate) fn invoke_callback(
    callback: &FrameCallback,
    metrics: &CaptureMetrics,
    device_id: DeviceId,
    frame: &VideoFrame,
) {
    let result =
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(device_id, frame)));
    if result.is_err() {
        metrics.callback_panics.fetch_add(1, Ordering::Relaxed);
        tracing::error!("Frame callback panicked for camera {}", device_id);
    }
}

/// Everything one reconciliation pass needs, cloneable into the monitor
/// thread.
struct ReconcileCtx {
    cfg: CaptureConfig,
    backend: Arc<dyn CaptureBackend>,
    clock: SharedClock,
    metrics: CaptureMetrics,
    sender: FrameSender,
    devices: Arc<Mutex<HashMap<DeviceId, DeviceRecord>>>,
    event_tx: broadcast::Sender<DeviceEvent>,
}

impl ReconcileCtx {
    fn reconcile(&self, discovered: &[DiscoveredDevice]) {
        let discovered_ids: HashSet<DeviceId> = discovered.iter().map(|d| d.id).collect();
        let mut reaped: Vec<(DeviceId, DeviceRecord)> = Vec::new();

        {
            let mut devices = self.devices.lock();

            for device in discovered {
                if devices.contains_key(&device.id) {
                    continue;
                }
                if devices.len() >= self.cfg.max_devices as usize {
                    tracing::warn!(
                        "Device limit {} reached, not adding {}",
                        self.cfg.max_devices,
                        device.descriptor
                    );
                    continue;
                }
                match self.start_worker(device) {
                    Ok(record) => {
                        tracing::info!("Adding camera {}", device.id);
                        self.metrics.workers_started.fetch_add(1, Ordering::Relaxed);
                        let _ = self.event_tx.send(DeviceEvent::DeviceAdded {
                            device_id: device.id,
                            label: record.label.clone(),
                        });
                        devices.insert(device.id, record);
                    }
                    Err(e) => {
                        tracing::error!("Error adding camera {}: {}", device.id, e);
                    }
                }
            }

            let ids: Vec<DeviceId> = devices.keys().copied().collect();
            for id in ids {
                let record = devices.get_mut(&id).expect("id was just listed");
                if record.worker.is_terminated() && !record.termination_reported {
                    record.termination_reported = true;
                    let _ = self.event_tx.send(DeviceEvent::WorkerTerminated {
                        device_id: id,
                        label: record.label.clone(),
                    });
                }
                // Fixed-list sources are reaped on termination alone (the
                // configured list always reports them); probed sources only
                // once discovery has also stopped reporting the id.
                let reap = match self.cfg.device_class {
                    DeviceClass::FixedList => record.worker.is_terminated(),
                    DeviceClass::Probed => {
                        !discovered_ids.contains(&id) && record.worker.is_terminated()
                    }
                };
                if reap {
                    let record = devices.remove(&id).expect("id was just listed");
                    reaped.push((id, record));
                }
            }
        }

        // Joins happen outside the critical section.
        for (id, record) in reaped {
            self.reap(id, record);
        }
    }

    fn start_worker(&self, device: &DiscoveredDevice) -> Result<DeviceRecord, CaptureError> {
        let worker = CaptureWorker::spawn(
            device.id,
            device.descriptor.clone(),
            Arc::clone(&self.backend),
            self.sender.clone(),
            self.cfg.worker_config(),
            self.clock.clone(),
            self.metrics.clone(),
        )?;
        Ok(DeviceRecord {
            label: worker.label().to_string(),
            worker,
            termination_reported: false,
        })
    }

    fn reap(&self, id: DeviceId, mut record: DeviceRecord) {
        tracing::info!("Removing camera {}", record.label);
        record.worker.cancel();
        if !record.worker.join_timeout(self.cfg.join_timeout) {
            tracing::warn!(
                "Worker for {} did not stop within {:?}, abandoning thread",
                record.label,
                self.cfg.join_timeout
            );
            self.metrics.join_timeouts.fetch_add(1, Ordering::Relaxed);
        }
        self.metrics.workers_reaped.fetch_add(1, Ordering::Relaxed);
        let _ = self.event_tx.send(DeviceEvent::DeviceRemoved {
            device_id: id,
            label: record.label,
        });
    }
}

fn monitor_loop(
    ctx: ReconcileCtx,
    discovery: Box<dyn DeviceDiscovery>,
    stop: Arc<AtomicBool>,
    interval: Duration,
    clock: SharedClock,
) {
    tracing::info!("Device monitor started");
    while !stop.load(Ordering::Relaxed) {
        let discovered = discovery.list_devices();
        ctx.reconcile(&discovered);

        // Sliced sleep so shutdown is observed promptly.
        let deadline = clock.now() + interval;
        while !stop.load(Ordering::Relaxed) {
            let now = clock.now();
            if now >= deadline {
                break;
            }
            clock.sleep((deadline - now).min(Duration::from_millis(50)));
        }
    }
    tracing::info!("Device monitor stopping");
}
