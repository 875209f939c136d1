use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Capture subsystem error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Shutdown requested")]
    ShutdownRequested,

    #[error("Fatal error, cannot recover: {0}")]
    Fatal(String),
}

/// Errors surfaced by the capture engine. Device- and display-level failures
/// are contained in their worker or reconciliation step; nothing here crashes
/// the orchestrator.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Device not found: {label}")]
    DeviceNotFound { label: String },

    #[error("Failed to open device {label}: {source}")]
    OpenFailed {
        label: String,
        source: SourceError,
    },

    #[error("Device {label} exhausted {attempts} open/reconnect attempts")]
    ExhaustedRetries { label: String, attempts: u32 },

    #[error("Worker for {label} did not stop within {timeout:?}")]
    JoinTimeout { label: String, timeout: Duration },

    #[error("Display surface error: {0}")]
    Display(String),

    #[error("Fatal error, cannot recover: {0}")]
    Fatal(String),
}

/// Errors reported by a capture-device collaborator (the driver seam).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("open failed: {0}")]
    Open(String),

    #[error("configure failed: {0}")]
    Configure(String),

    #[error("end of stream")]
    EndOfStream,

    #[error("device I/O error: {0}")]
    Io(String),
}

/// Lifecycle events emitted by the orchestrator as devices come and go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A discovered device was added to the table and its worker started.
    DeviceAdded { device_id: u32, label: String },
    /// A device record was reaped and its worker joined (or abandoned).
    DeviceRemoved { device_id: u32, label: String },
    /// A worker exhausted its retries and reached the terminal state.
    WorkerTerminated { device_id: u32, label: String },
}
