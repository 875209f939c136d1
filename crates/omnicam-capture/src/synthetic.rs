//! A deterministic capture backend that generates test-pattern frames.
//! Lets the whole pipeline run end to end on machines with no cameras.

use crate::source::{BackendVariant, CaptureBackend, CaptureHandle, DeviceDescriptor, RawFrame,
    StreamSettings};
use omnicam_foundation::{SharedClock, SourceError};
use std::time::Duration;

/// Pretends to host `device_count` local cameras; any URI descriptor opens
/// as well, standing in for a reachable network source.
pub struct SyntheticBackend {
    device_count: u32,
    clock: SharedClock,
}

impl SyntheticBackend {
    pub fn new(device_count: u32, clock: SharedClock) -> Self {
        Self {
            device_count,
            clock,
        }
    }
}

impl CaptureBackend for SyntheticBackend {
    fn open(
        &self,
        descriptor: &DeviceDescriptor,
        _variant: BackendVariant,
    ) -> Result<Box<dyn CaptureHandle>, SourceError> {
        match descriptor {
            DeviceDescriptor::Index(i) if *i >= self.device_count => Err(SourceError::Open(
                format!("no synthetic device at index {}", i),
            )),
            _ => Ok(Box::new(SyntheticHandle {
                settings: StreamSettings::default(),
                frame_no: 0,
                clock: self.clock.clone(),
            })),
        }
    }
}

struct SyntheticHandle {
    settings: StreamSettings,
    frame_no: u64,
    clock: SharedClock,
}

impl CaptureHandle for SyntheticHandle {
    fn configure(&mut self, settings: &StreamSettings) -> Result<(), SourceError> {
        self.settings = *settings;
        Ok(())
    }

    fn read(&mut self) -> Result<RawFrame, SourceError> {
        // Pace reads like a real driver blocking until the next frame.
        let fps = self.settings.fps.max(1);
        self.clock.sleep(Duration::from_secs(1) / fps);

        let (w, h) = (self.settings.width, self.settings.height);
        let mut pixels = vec![0u8; (w * h * 3) as usize];
        for y in 0..h {
            for x in 0..w {
                let base = ((y * w + x) * 3) as usize;
                pixels[base] = x.wrapping_add(self.frame_no as u32) as u8;
                pixels[base + 1] = y.wrapping_add(self.frame_no as u32) as u8;
                pixels[base + 2] = self.frame_no as u8;
            }
        }
        self.frame_no += 1;
        Ok(RawFrame {
            pixels,
            width: w,
            height: h,
        })
    }

    fn release(&mut self) {}
}
