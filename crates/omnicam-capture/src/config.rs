use crate::source::StreamSettings;
use crate::worker::WorkerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How devices are enumerated, which also decides the removal policy for
/// terminated workers (see `CaptureManager`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    /// Configured connection strings; discovery always reports the whole list.
    FixedList,
    /// Locally probed index range.
    Probed,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::FixedList => "network",
            DeviceClass::Probed => "local",
        }
    }
}

/// Orchestration strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// One worker thread per device, reconciled against discovery.
    Concurrent,
    /// A single context cycling through devices round-robin.
    Sequential,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub show_display: bool,
    pub device_class: DeviceClass,
    /// Connection strings for `DeviceClass::FixedList`.
    pub device_list: Vec<String>,
    pub max_devices: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    pub target_fps: u32,
    /// Streaming time below which a read failure is retried in place.
    #[serde(with = "duration_secs")]
    pub min_uptime: Duration,
    pub max_retries: u32,
    #[serde(with = "duration_secs")]
    pub open_retry_delay: Duration,
    #[serde(with = "duration_secs")]
    pub reconnect_delay: Duration,
    #[serde(with = "duration_secs")]
    pub read_retry_delay: Duration,
    #[serde(with = "duration_secs")]
    pub scan_interval: Duration,
    /// Maximum age of a cached frame still eligible to stand in for a
    /// missing live frame.
    #[serde(with = "duration_secs")]
    pub frame_freshness_window: Duration,
    #[serde(with = "duration_secs")]
    pub join_timeout: Duration,
    /// Key codes that stop the run loop when the display reports them.
    pub exit_keys: Vec<i32>,
    pub run_mode: RunMode,
    /// Time each device is shown in sequential mode.
    #[serde(with = "duration_secs")]
    pub switch_interval: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            show_display: false,
            device_class: DeviceClass::Probed,
            device_list: Vec::new(),
            max_devices: 10,
            frame_width: 640,
            frame_height: 480,
            target_fps: 30,
            min_uptime: Duration::from_secs(5),
            max_retries: 3,
            open_retry_delay: Duration::from_secs(1),
            reconnect_delay: Duration::from_secs(2),
            read_retry_delay: Duration::from_millis(100),
            scan_interval: Duration::from_secs(3),
            frame_freshness_window: Duration::from_secs(5),
            join_timeout: Duration::from_secs(1),
            exit_keys: vec![113, 27], // 'q', Esc
            run_mode: RunMode::Concurrent,
            switch_interval: Duration::from_secs(5),
        }
    }
}

impl CaptureConfig {
    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            width: self.frame_width,
            height: self.frame_height,
            fps: self.target_fps,
            ..StreamSettings::default()
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            settings: self.stream_settings(),
            variants: Vec::new(), // filled from the descriptor at spawn
            min_uptime: self.min_uptime,
            max_retries: self.max_retries,
            open_retry_delay: self.open_retry_delay,
            reconnect_delay: self.reconnect_delay,
            read_retry_delay: self.read_retry_delay,
        }
    }

    pub fn bus_capacity(&self) -> usize {
        (self.max_devices as usize * 2).max(1)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be non-negative"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}
