//! The capture-device collaborator seam. Everything that actually touches
//! pixels lives behind these traits; the engine only sequences open,
//! configure, read, and release calls.

use omnicam_foundation::SourceError;
use std::fmt;

/// Opaque locator for one capture source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceDescriptor {
    /// Local device, addressed by platform index.
    Index(u32),
    /// Network source, addressed by connection string (e.g. an RTSP URL).
    Uri(String),
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceDescriptor::Index(i) => write!(f, "camera {}", i),
            DeviceDescriptor::Uri(uri) => write!(f, "{}", uri),
        }
    }
}

/// Driver backend variants a worker tries in order when opening a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendVariant {
    V4l2,
    DirectShow,
    MediaFoundation,
    /// Let the driver pick; used for connection-string sources.
    Auto,
}

#[cfg(target_os = "linux")]
const INDEX_VARIANTS: &[BackendVariant] = &[BackendVariant::V4l2];
#[cfg(not(target_os = "linux"))]
const INDEX_VARIANTS: &[BackendVariant] =
    &[BackendVariant::DirectShow, BackendVariant::MediaFoundation];

const URI_VARIANTS: &[BackendVariant] = &[BackendVariant::Auto];

/// Candidate open order for a descriptor on the current platform.
pub fn default_backend_variants(descriptor: &DeviceDescriptor) -> &'static [BackendVariant] {
    match descriptor {
        DeviceDescriptor::Index(_) => INDEX_VARIANTS,
        DeviceDescriptor::Uri(_) => URI_VARIANTS,
    }
}

/// Requested stream parameters. Applied best-effort: network sources may
/// honor only the buffer depth hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub buffer_depth: u32,
    pub autofocus: bool,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            buffer_depth: 1,
            autofocus: false,
        }
    }
}

/// A frame as the driver hands it over, before the engine stamps it.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// An opened capture session. All calls may block for driver-dependent
/// durations; the engine only ever invokes them from the owning worker.
pub trait CaptureHandle: Send {
    fn configure(&mut self, settings: &StreamSettings) -> Result<(), SourceError>;

    fn read(&mut self) -> Result<RawFrame, SourceError>;

    fn release(&mut self);
}

/// Factory for capture sessions, shared by workers and probing discovery.
pub trait CaptureBackend: Send + Sync {
    fn open(
        &self,
        descriptor: &DeviceDescriptor,
        variant: BackendVariant,
    ) -> Result<Box<dyn CaptureHandle>, SourceError>;
}
