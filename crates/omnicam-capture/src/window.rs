//! Display-surface reconciliation. The sink is the display collaborator;
//! the reconciler keeps one surface per device currently present in the
//! frame map and tears down the rest. All sink calls happen on the consumer
//! context; surface failures are logged and never block frame delivery.

use crate::config::DeviceClass;
use crate::{DeviceId, VideoFrame};
use omnicam_foundation::CaptureError;
use std::collections::HashMap;

pub trait DisplaySink: Send {
    fn create_surface(&mut self, title: &str) -> Result<(), CaptureError>;

    fn show(&mut self, title: &str, frame: &VideoFrame) -> Result<(), CaptureError>;

    fn destroy_surface(&mut self, title: &str);

    /// Most recent key press, if the display supports input.
    fn poll_key(&mut self) -> Option<i32> {
        None
    }
}

/// Headless sink: accepts everything, shows nothing.
#[derive(Debug, Default)]
pub struct NullDisplay;

impl DisplaySink for NullDisplay {
    fn create_surface(&mut self, _title: &str) -> Result<(), CaptureError> {
        Ok(())
    }

    fn show(&mut self, _title: &str, _frame: &VideoFrame) -> Result<(), CaptureError> {
        Ok(())
    }

    fn destroy_surface(&mut self, _title: &str) {}
}

/// Deterministic surface title for a device.
pub fn surface_title(device_id: DeviceId, class: DeviceClass, label: &str) -> String {
    format!("Camera {} ({}): {}", device_id, class.as_str(), label)
}

pub struct WindowReconciler {
    sink: Box<dyn DisplaySink>,
    titles: HashMap<DeviceId, String>,
}

impl WindowReconciler {
    pub fn new(sink: Box<dyn DisplaySink>) -> Self {
        Self {
            sink,
            titles: HashMap::new(),
        }
    }

    /// Aligns the surface set with the current frame map. `titles` carries
    /// the desired title per live device; ids missing from it (already
    /// removed from the table) get no surface even if a late frame arrived.
    pub fn sync(
        &mut self,
        frames: &HashMap<DeviceId, VideoFrame>,
        titles: &HashMap<DeviceId, String>,
    ) {
        // Tear down surfaces whose device left the frame map.
        let stale: Vec<DeviceId> = self
            .titles
            .keys()
            .filter(|id| !frames.contains_key(id) || !titles.contains_key(id))
            .copied()
            .collect();
        for id in stale {
            if let Some(title) = self.titles.remove(&id) {
                self.sink.destroy_surface(&title);
            }
        }

        for (id, frame) in frames {
            let Some(wanted) = titles.get(id) else {
                continue;
            };
            if !self.titles.contains_key(id) {
                if let Err(e) = self.sink.create_surface(wanted) {
                    tracing::error!("Display error for camera {}: {}", id, e);
                    continue;
                }
                self.titles.insert(*id, wanted.clone());
            }
            if let Err(e) = self.sink.show(wanted, frame) {
                tracing::error!("Display error for camera {}: {}", id, e);
            }
        }
    }

    pub fn poll_key(&mut self) -> Option<i32> {
        self.sink.poll_key()
    }

    pub fn active_surfaces(&self) -> usize {
        self.titles.len()
    }

    /// Unconditionally destroys every remaining surface (shutdown path).
    pub fn destroy_all(&mut self) {
        for (_, title) in self.titles.drain() {
            self.sink.destroy_surface(&title);
        }
    }
}
