//! Synthetic test-pattern camera
//!
//! Used when no hardware is present (development mode) and by tests, which
//! can make opens or reads fail on demand.

use super::{CaptureBackend, CaptureFormat, CaptureHandle, DeviceDescriptor, DeviceProvider};
use camstream_core::{CamStreamError, PixelFormat, Resolution, Result, VideoFrame};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Largest format the synthetic device accepts
const MAX_RESOLUTION: Resolution = Resolution::new(1920, 1080);

/// Capture backend producing a solid-colour pattern that changes every frame
#[derive(Debug, Default)]
pub struct SyntheticBackend {
    failing_opens: Mutex<HashSet<u32>>,
    read_faults: Arc<AtomicU32>,
    read_delay: Mutex<Option<Duration>>,
    opens: AtomicUsize,
    opens_by_index: Mutex<HashMap<u32, usize>>,
}

impl SyntheticBackend {
    /// Create a backend where every device opens and reads successfully
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every open of `index` fail until [`SyntheticBackend::restore_open`]
    pub fn fail_open(&self, index: u32) {
        self.failing_opens.lock().insert(index);
    }

    /// Let `index` open again
    pub fn restore_open(&self, index: u32) {
        self.failing_opens.lock().remove(&index);
    }

    /// Make the next `count` reads (on any handle) fail
    pub fn inject_read_failures(&self, count: u32) {
        self.read_faults.store(count, Ordering::SeqCst);
    }

    /// Delay every read by `delay`, emulating a device that blocks
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        *self.read_delay.lock() = delay;
    }

    /// Total number of successful opens
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Successful opens of one device index
    pub fn open_count_for(&self, index: u32) -> usize {
        self.opens_by_index.lock().get(&index).copied().unwrap_or(0)
    }
}

impl CaptureBackend for SyntheticBackend {
    fn open(&self, index: u32) -> Result<Box<dyn CaptureHandle>> {
        if self.failing_opens.lock().contains(&index) {
            return Err(CamStreamError::DeviceOpenFailed {
                camera_id: format!("synthetic-{}", index),
                index,
                reason: "device unavailable".to_string(),
            });
        }

        self.opens.fetch_add(1, Ordering::SeqCst);
        *self.opens_by_index.lock().entry(index).or_insert(0) += 1;

        Ok(Box::new(SyntheticHandle {
            index,
            format: CaptureFormat::new(640, 480, 30.0),
            sequence: 0,
            read_faults: self.read_faults.clone(),
            read_delay: *self.read_delay.lock(),
            released: false,
        }))
    }
}

struct SyntheticHandle {
    index: u32,
    format: CaptureFormat,
    sequence: u64,
    read_faults: Arc<AtomicU32>,
    read_delay: Option<Duration>,
    released: bool,
}

impl SyntheticHandle {
    fn read_error(&self, reason: &str) -> CamStreamError {
        CamStreamError::DeviceReadFailed {
            camera_id: format!("synthetic-{}", self.index),
            reason: reason.to_string(),
        }
    }
}

impl CaptureHandle for SyntheticHandle {
    fn read(&mut self) -> Result<VideoFrame> {
        if self.released {
            return Err(self.read_error("device released"));
        }
        if let Some(delay) = self.read_delay {
            std::thread::sleep(delay);
        }

        let faulted = self
            .read_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if faulted {
            return Err(self.read_error("injected read failure"));
        }

        self.sequence += 1;
        // Never zero, so a captured frame is always distinguishable from a black one.
        let shade = 1 + (self.sequence % 250) as u8;
        let resolution = self.format.resolution;
        let data = vec![shade; resolution.pixel_count() * PixelFormat::Bgr24.bytes_per_pixel()];

        Ok(VideoFrame::new(
            resolution,
            PixelFormat::Bgr24,
            data,
            self.sequence,
        ))
    }

    fn set(&mut self, width: u32, height: u32, fps: f64) -> Result<()> {
        if width == 0 || height == 0 || fps <= 0.0 {
            return Err(CamStreamError::InvalidConfiguration {
                message: format!("unsupported format {}x{}@{}", width, height, fps),
            });
        }
        // Clamp like a real driver would instead of rejecting large sizes.
        self.format = CaptureFormat::new(
            width.min(MAX_RESOLUTION.width),
            height.min(MAX_RESOLUTION.height),
            fps.min(60.0),
        );
        Ok(())
    }

    fn format(&self) -> CaptureFormat {
        self.format
    }

    fn release(&mut self) {
        self.released = true;
    }
}

/// Device provider announcing a single synthetic camera
#[derive(Debug, Clone, Default)]
pub struct SyntheticDeviceProvider;

impl SyntheticDeviceProvider {
    /// Descriptor used for the development-mode camera
    pub fn descriptor() -> DeviceDescriptor {
        DeviceDescriptor {
            id: "camera1".to_string(),
            index: 0,
            width: 640,
            height: 480,
            fps: 30.0,
            name: "Synthetic Camera".to_string(),
        }
    }
}

impl DeviceProvider for SyntheticDeviceProvider {
    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        Ok(vec![Self::descriptor()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_frames_are_uniform_and_non_black() {
        let backend = SyntheticBackend::new();
        let mut handle = backend.open(0).unwrap();
        handle.set(8, 4, 30.0).unwrap();

        let frame = handle.read().unwrap();
        assert_eq!(frame.resolution(), Resolution::new(8, 4));
        assert!(frame.is_well_formed());
        assert!(!frame.is_black());
        assert!(frame.data.iter().all(|b| *b == frame.data[0]));
    }

    #[test]
    fn test_open_failure_injection() {
        let backend = SyntheticBackend::new();
        backend.fail_open(2);
        assert!(backend.open(2).is_err());
        backend.restore_open(2);
        assert!(backend.open(2).is_ok());
        assert_eq!(backend.open_count_for(2), 1);
    }

    #[test]
    fn test_read_failure_injection() {
        let backend = SyntheticBackend::new();
        let mut handle = backend.open(0).unwrap();
        backend.inject_read_failures(2);
        assert!(handle.read().is_err());
        assert!(handle.read().is_err());
        assert!(handle.read().is_ok());
    }

    #[test]
    fn test_set_clamps_to_device_limits() {
        let backend = SyntheticBackend::new();
        let mut handle = backend.open(0).unwrap();
        handle.set(4096, 4096, 120.0).unwrap();
        assert_eq!(handle.format().resolution, MAX_RESOLUTION);
        assert_eq!(handle.format().fps, 60.0);
    }

    #[test]
    fn test_released_handle_fails_reads() {
        let backend = SyntheticBackend::new();
        let mut handle = backend.open(0).unwrap();
        handle.release();
        assert!(handle.read().is_err());
    }
}
