//! Per-device capture worker: a dedicated thread owning one device's
//! open/configure/read/release cycle and its retry state machine.
//!
//! States: Opening -> Streaming -> Backoff -> { Opening | Terminated }.
//! The cancellation flag is checked at every transition and inside the read
//! loop; a cancelled worker releases the device and exits without counting
//! a failure and without reaching the terminal state.

use crate::bus::FrameSender;
use crate::metrics::CaptureMetrics;
use crate::source::{
    default_backend_variants, BackendVariant, CaptureBackend, CaptureHandle, DeviceDescriptor,
    StreamSettings,
};
use crate::{DeviceId, VideoFrame};
use omnicam_foundation::{CaptureError, SharedClock};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub settings: StreamSettings,
    /// Backend variants tried in order; empty means the descriptor's
    /// platform defaults.
    pub variants: Vec<BackendVariant>,
    pub min_uptime: Duration,
    pub max_retries: u32,
    pub open_retry_delay: Duration,
    pub reconnect_delay: Duration,
    pub read_retry_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            settings: StreamSettings::default(),
            variants: Vec::new(),
            min_uptime: Duration::from_secs(5),
            max_retries: 3,
            open_retry_delay: Duration::from_secs(1),
            reconnect_delay: Duration::from_secs(2),
            read_retry_delay: Duration::from_millis(100),
        }
    }
}

/// State observable from outside the worker thread.
#[derive(Debug, Default)]
pub struct WorkerShared {
    terminated: AtomicBool,
    open_failures: AtomicU32,
    sessions_started: AtomicU32,
    backoffs: AtomicU32,
}

impl WorkerShared {
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn open_failures(&self) -> u32 {
        self.open_failures.load(Ordering::SeqCst)
    }

    pub fn sessions_started(&self) -> u32 {
        self.sessions_started.load(Ordering::SeqCst)
    }

    pub fn backoffs(&self) -> u32 {
        self.backoffs.load(Ordering::SeqCst)
    }
}

/// Handle the orchestrator keeps per live worker.
pub struct WorkerHandle {
    device_id: DeviceId,
    label: String,
    handle: Option<JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
    shared: Arc<WorkerShared>,
}

impl WorkerHandle {
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.is_terminated()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map(|h| h.is_finished()).unwrap_or(true)
    }

    pub fn shared(&self) -> Arc<WorkerShared> {
        Arc::clone(&self.shared)
    }

    /// Joins the worker thread, giving up after `timeout`. Returns false if
    /// the thread is still running; the caller abandons it in that case (a
    /// deliberately accepted leak bounded by process lifetime).
    pub fn join_timeout(&mut self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };
        let deadline = Instant::now() + timeout;
        loop {
            if handle.is_finished() {
                let _ = handle.join();
                return true;
            }
            if Instant::now() >= deadline {
                self.handle = Some(handle);
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
}

pub struct CaptureWorker;

impl CaptureWorker {
    /// Starts the worker thread for one device. No device I/O happens on the
    /// caller's thread; the first open attempt runs inside the new thread.
    pub fn spawn(
        device_id: DeviceId,
        descriptor: DeviceDescriptor,
        backend: Arc<dyn CaptureBackend>,
        sender: FrameSender,
        mut cfg: WorkerConfig,
        clock: SharedClock,
        metrics: CaptureMetrics,
    ) -> Result<WorkerHandle, CaptureError> {
        if cfg.variants.is_empty() {
            cfg.variants = default_backend_variants(&descriptor).to_vec();
        }

        let label = descriptor.to_string();
        let cancel = Arc::new(AtomicBool::new(false));
        let shared = Arc::new(WorkerShared::default());

        let run = WorkerRun {
            device_id,
            descriptor,
            label: label.clone(),
            backend,
            sender,
            cfg,
            clock,
            metrics,
            cancel: Arc::clone(&cancel),
            shared: Arc::clone(&shared),
            streak: 0,
        };

        let handle = thread::Builder::new()
            .name(format!("capture-{}", device_id))
            .spawn(move || run.run())
            .map_err(|e| CaptureError::Fatal(format!("Failed to spawn capture thread: {}", e)))?;

        Ok(WorkerHandle {
            device_id,
            label,
            handle: Some(handle),
            cancel,
            shared,
        })
    }
}

enum SessionEnd {
    Cancelled,
    Failed,
}

struct WorkerRun {
    device_id: DeviceId,
    descriptor: DeviceDescriptor,
    label: String,
    backend: Arc<dyn CaptureBackend>,
    sender: FrameSender,
    cfg: WorkerConfig,
    clock: SharedClock,
    metrics: CaptureMetrics,
    cancel: Arc<AtomicBool>,
    shared: Arc<WorkerShared>,
    /// Consecutive open/reconnect failures; cleared once a session streams
    /// past min_uptime.
    streak: u32,
}

impl WorkerRun {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Sleep in short slices so the cancellation signal is observed well
    /// within the orchestrator's join timeout.
    fn sleep_cancellable(&self, duration: Duration) {
        let deadline = self.clock.now() + duration;
        while !self.cancelled() {
            let now = self.clock.now();
            if now >= deadline {
                return;
            }
            let remaining = deadline - now;
            self.clock.sleep(remaining.min(Duration::from_millis(50)));
        }
    }

    fn run(mut self) {
        loop {
            if self.cancelled() {
                tracing::debug!("Camera {} worker cancelled", self.label);
                return;
            }

            // Opening
            match self.try_open() {
                Some(handle) => {
                    self.shared.sessions_started.fetch_add(1, Ordering::SeqCst);
                    match self.stream(handle) {
                        SessionEnd::Cancelled => return,
                        SessionEnd::Failed => {}
                    }
                    // Backoff
                    self.shared.backoffs.fetch_add(1, Ordering::SeqCst);
                    if self.streak >= self.cfg.max_retries {
                        break;
                    }
                    tracing::info!("Reconnecting to {}...", self.label);
                    self.metrics.reconnections.fetch_add(1, Ordering::Relaxed);
                    self.sleep_cancellable(self.cfg.reconnect_delay);
                }
                None => {
                    self.streak += 1;
                    self.shared.open_failures.fetch_add(1, Ordering::SeqCst);
                    self.metrics.open_failures.fetch_add(1, Ordering::Relaxed);
                    if self.streak >= self.cfg.max_retries {
                        break;
                    }
                    self.sleep_cancellable(self.cfg.open_retry_delay);
                }
            }
        }

        // Terminated: absorbing. The orchestrator reaps the record.
        self.shared.terminated.store(true, Ordering::SeqCst);
        tracing::warn!(
            "Camera {} worker terminated after {} consecutive failures",
            self.label,
            self.streak
        );
    }

    /// One pass over the configured backend variants; first one that opens
    /// and survives configuration wins.
    fn try_open(&self) -> Option<Box<dyn CaptureHandle>> {
        for variant in &self.cfg.variants {
            match self.backend.open(&self.descriptor, *variant) {
                Ok(mut handle) => {
                    // Configuration is best-effort; a source that rejects it
                    // still streams at its own parameters.
                    if let Err(e) = handle.configure(&self.cfg.settings) {
                        tracing::warn!("Camera {} configure failed: {}", self.label, e);
                    }
                    return Some(handle);
                }
                Err(e) => {
                    tracing::debug!(
                        "Camera {} open via {:?} failed: {}",
                        self.label,
                        variant,
                        e
                    );
                }
            }
        }
        tracing::error!("Cannot open camera {}", self.label);
        None
    }

    fn stream(&mut self, mut handle: Box<dyn CaptureHandle>) -> SessionEnd {
        tracing::info!("Camera {} started", self.label);
        let started = self.clock.now();
        let mut sustained = false;

        loop {
            if self.cancelled() {
                handle.release();
                return SessionEnd::Cancelled;
            }

            match handle.read() {
                Ok(raw) => {
                    let now = self.clock.now();
                    if !sustained && now.duration_since(started) >= self.cfg.min_uptime {
                        sustained = true;
                        self.streak = 0;
                    }
                    self.sender.push(VideoFrame {
                        device_id: self.device_id,
                        pixels: Arc::from(raw.pixels),
                        width: raw.width,
                        height: raw.height,
                        timestamp: now,
                    });
                }
                Err(e) => {
                    let elapsed = self.clock.now().duration_since(started);
                    if elapsed < self.cfg.min_uptime {
                        // A glitch this early must not tear the device down.
                        tracing::warn!("Camera {} frame read error", self.label);
                        self.clock.sleep(self.cfg.read_retry_delay);
                        continue;
                    }
                    tracing::warn!(
                        "Camera {} stream ended after {:.1}s: {}",
                        self.label,
                        elapsed.as_secs_f64(),
                        e
                    );
                    self.streak += 1;
                    handle.release();
                    return SessionEnd::Failed;
                }
            }
        }
    }
}
