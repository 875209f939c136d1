//! Periodic device enumeration. Implementations must be idempotent and must
//! not let one unreadable candidate abort enumeration of the rest.

use crate::source::{default_backend_variants, CaptureBackend, DeviceDescriptor};
use crate::DeviceId;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub id: DeviceId,
    pub descriptor: DeviceDescriptor,
}

pub trait DeviceDiscovery: Send {
    /// Current set of reachable devices, called once per monitor tick.
    fn list_devices(&self) -> Vec<DiscoveredDevice>;
}

/// Discovery for configured network sources: the whole list, every tick.
pub struct FixedListDiscovery {
    descriptors: Vec<DeviceDescriptor>,
}

impl FixedListDiscovery {
    pub fn new(descriptors: Vec<DeviceDescriptor>) -> Self {
        Self { descriptors }
    }

    pub fn from_uris<I, S>(uris: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            uris.into_iter()
                .map(|u| DeviceDescriptor::Uri(u.into()))
                .collect(),
        )
    }
}

impl DeviceDiscovery for FixedListDiscovery {
    fn list_devices(&self) -> Vec<DiscoveredDevice> {
        self.descriptors
            .iter()
            .enumerate()
            .map(|(i, descriptor)| DiscoveredDevice {
                id: i as DeviceId,
                descriptor: descriptor.clone(),
            })
            .collect()
    }
}

/// Discovery for local devices: probe a bounded index range by briefly
/// opening each candidate and releasing it again.
pub struct ProbeDiscovery {
    backend: Arc<dyn CaptureBackend>,
    max_devices: u32,
}

impl ProbeDiscovery {
    pub fn new(backend: Arc<dyn CaptureBackend>, max_devices: u32) -> Self {
        Self {
            backend,
            max_devices,
        }
    }
}

impl DeviceDiscovery for ProbeDiscovery {
    fn list_devices(&self) -> Vec<DiscoveredDevice> {
        let mut devices = Vec::new();
        for i in 0..self.max_devices {
            let descriptor = DeviceDescriptor::Index(i);
            let opened = default_backend_variants(&descriptor)
                .iter()
                .find_map(|variant| self.backend.open(&descriptor, *variant).ok());
            match opened {
                Some(mut handle) => {
                    handle.release();
                    devices.push(DiscoveredDevice {
                        id: i,
                        descriptor,
                    });
                }
                None => {
                    tracing::debug!("Camera index {} is not available", i);
                }
            }
        }
        devices
    }
}

/// Discovery that trusts the Linux video4linux enumeration files instead of
/// opening devices. Entries whose reported name does not look like a camera
/// (e.g. metadata nodes) are skipped, as are unreadable entries.
pub struct SysfsDiscovery {
    root: PathBuf,
    max_devices: u32,
}

impl SysfsDiscovery {
    pub fn new(max_devices: u32) -> Self {
        Self::with_root("/sys/class/video4linux", max_devices)
    }

    pub fn with_root(root: impl Into<PathBuf>, max_devices: u32) -> Self {
        Self {
            root: root.into(),
            max_devices,
        }
    }
}

impl DeviceDiscovery for SysfsDiscovery {
    fn list_devices(&self) -> Vec<DiscoveredDevice> {
        let mut devices = Vec::new();
        for i in 0..self.max_devices {
            let name_file = self.root.join(format!("video{}", i)).join("name");
            match std::fs::read_to_string(&name_file) {
                Ok(name) if name.to_lowercase().contains("camera") => {
                    devices.push(DiscoveredDevice {
                        id: i,
                        descriptor: DeviceDescriptor::Index(i),
                    });
                }
                Ok(_) => {}
                Err(_) => continue,
            }
        }
        devices
    }
}
