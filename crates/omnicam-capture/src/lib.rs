pub mod bus;
pub mod config;
pub mod discovery;
pub mod manager;
pub mod metrics;
pub mod source;
mod strategy;
pub mod synthetic;
pub mod window;
pub mod worker;

// Public API
pub use bus::{FrameBus, FrameDrain, FrameSender};
pub use config::{CaptureConfig, DeviceClass, RunMode};
pub use discovery::{
    DeviceDiscovery, DiscoveredDevice, FixedListDiscovery, ProbeDiscovery, SysfsDiscovery,
};
pub use manager::{CaptureManager, FrameCallback, StopHandle};
pub use metrics::CaptureMetrics;
pub use source::{
    BackendVariant, CaptureBackend, CaptureHandle, DeviceDescriptor, RawFrame, StreamSettings,
};
pub use synthetic::SyntheticBackend;
pub use window::{DisplaySink, NullDisplay, WindowReconciler};
pub use worker::{CaptureWorker, WorkerConfig, WorkerHandle, WorkerShared};

use std::sync::Arc;
use std::time::Instant;

/// Identifier a device keeps for its whole table lifetime. Probe index for
/// local devices, list position for configured network sources.
pub type DeviceId = u32;

/// One captured frame, shared read-only once it leaves the bus.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub device_id: DeviceId,
    pub pixels: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
}
