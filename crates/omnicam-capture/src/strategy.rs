//! Sequential round-robin orchestration: a single context cycles through
//! the discovered devices, streaming one at a time for the configured
//! switch interval. The concurrent strategy lives in `manager`.

use crate::manager::{invoke_callback, CaptureManager};
use crate::source::default_backend_variants;
use crate::window::surface_title;
use crate::{DiscoveredDevice, VideoFrame};
use omnicam_foundation::{AppError, AppState};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub(crate) fn run_sequential(mgr: &mut CaptureManager) -> Result<(), AppError> {
    let discovery = mgr
        .discovery
        .take()
        .ok_or_else(|| AppError::Fatal("Capture manager already started".into()))?;
    mgr.state.transition(AppState::Running)?;

    let devices = discovery.list_devices();
    if devices.is_empty() {
        tracing::error!("No cameras found");
        finish(mgr);
        return Ok(());
    }
    tracing::info!(
        "Available cameras: {:?}",
        devices.iter().map(|d| d.id).collect::<Vec<_>>()
    );

    let mut index = 0usize;
    while !mgr.stop.load(Ordering::Relaxed) {
        let device = &devices[index % devices.len()];
        let streamed = stream_one(mgr, device);
        if !streamed && !mgr.stop.load(Ordering::Relaxed) {
            tracing::warn!("Skipping camera {}", device.descriptor);
            mgr.clock.sleep(mgr.cfg.open_retry_delay);
        }
        index += 1;
    }

    finish(mgr);
    Ok(())
}

/// Streams one device for the switch interval. Returns false if the device
/// could not be opened.
fn stream_one(mgr: &mut CaptureManager, device: &DiscoveredDevice) -> bool {
    let variants = default_backend_variants(&device.descriptor);
    let Some(mut handle) = variants
        .iter()
        .find_map(|variant| mgr.backend.open(&device.descriptor, *variant).ok())
    else {
        return false;
    };

    let settings = mgr.cfg.stream_settings();
    if let Err(e) = handle.configure(&settings) {
        tracing::warn!("Camera {} configure failed: {}", device.descriptor, e);
    }

    let label = device.descriptor.to_string();
    let title = surface_title(device.id, mgr.cfg.device_class, &label);
    let titles: HashMap<_, _> = [(device.id, title)].into_iter().collect();
    let started = mgr.clock.now();

    while !mgr.stop.load(Ordering::Relaxed) {
        if mgr.clock.now().duration_since(started) >= mgr.cfg.switch_interval {
            break;
        }
        match handle.read() {
            Ok(raw) => {
                let frame = VideoFrame {
                    device_id: device.id,
                    pixels: Arc::from(raw.pixels),
                    width: raw.width,
                    height: raw.height,
                    timestamp: mgr.clock.now(),
                };
                mgr.metrics.frames_captured.fetch_add(1, Ordering::Relaxed);
                if let Some(callback) = &mgr.callback {
                    invoke_callback(callback, &mgr.metrics, device.id, &frame);
                }
                if mgr.cfg.show_display {
                    let frames: HashMap<_, _> = [(device.id, frame)].into_iter().collect();
                    mgr.reconciler.sync(&frames, &titles);
                    if let Some(key) = mgr.reconciler.poll_key() {
                        if mgr.cfg.exit_keys.contains(&key) {
                            tracing::info!("Exit key pressed, stopping");
                            mgr.stop.store(true, Ordering::SeqCst);
                        }
                    }
                }
            }
            Err(_) => {
                // Stay on this device until the switch interval elapses.
                mgr.clock.sleep(mgr.cfg.read_retry_delay);
            }
        }
    }

    handle.release();
    true
}

fn finish(mgr: &mut CaptureManager) {
    mgr.reconciler.destroy_all();
    let _ = mgr.state.transition(AppState::Stopping);
    let _ = mgr.state.transition(AppState::Stopped);
    tracing::info!("Sequential capture stopped");
}
