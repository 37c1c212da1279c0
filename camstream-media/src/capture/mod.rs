//! Capture hardware interfaces
//!
//! The capture loop only ever talks to a camera through these traits. Real
//! platform backends (V4L2, AVFoundation, DirectShow) live outside this
//! crate; [`synthetic`] provides a test-pattern implementation used in
//! development mode and in tests.

pub mod synthetic;

use camstream_core::{Resolution, Result, VideoFrame};
use serde::{Deserialize, Serialize};

pub use synthetic::{SyntheticBackend, SyntheticDeviceProvider};

/// Format negotiated with a capture device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaptureFormat {
    /// Frame size
    pub resolution: Resolution,
    /// Frames per second
    pub fps: f64,
}

impl CaptureFormat {
    /// Create a capture format
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        Self {
            resolution: Resolution::new(width, height),
            fps,
        }
    }

    /// Time between two frames at this rate
    pub fn frame_interval(&self) -> std::time::Duration {
        if self.fps <= 0.0 {
            return std::time::Duration::ZERO;
        }
        std::time::Duration::from_secs_f64(1.0 / self.fps)
    }
}

/// An open capture device.
///
/// Owned exclusively by one capture thread; `read` is expected to block
/// until the device delivers the next frame.
pub trait CaptureHandle: Send {
    /// Read one frame
    fn read(&mut self) -> Result<VideoFrame>;

    /// Request a capture format. The device may pick something else;
    /// [`CaptureHandle::format`] reports what it actually uses.
    fn set(&mut self, width: u32, height: u32, fps: f64) -> Result<()>;

    /// Format the device is actually delivering
    fn format(&self) -> CaptureFormat;

    /// Release the device. Reads after release fail.
    fn release(&mut self);
}

/// Opens capture devices by hardware index
pub trait CaptureBackend: Send + Sync {
    /// Open the device at `index`
    fn open(&self, index: u32) -> Result<Box<dyn CaptureHandle>>;
}

/// A camera as reported by device enumeration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Stable camera identifier
    pub id: String,
    /// Hardware index
    pub index: u32,
    /// Preferred width
    pub width: u32,
    /// Preferred height
    pub height: u32,
    /// Preferred frame rate
    pub fps: f64,
    /// Human readable name
    pub name: String,
}

/// Supplies the list of cameras the registry is configured with.
///
/// Platform probing happens behind this trait; it is consulted when the
/// registry is built, never at request time.
pub trait DeviceProvider: Send + Sync {
    /// Enumerate available devices
    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>>;
}

/// Device provider backed by a fixed list
#[derive(Debug, Clone, Default)]
pub struct StaticDeviceProvider {
    devices: Vec<DeviceDescriptor>,
}

impl StaticDeviceProvider {
    /// Create a provider returning `devices`
    pub fn new(devices: Vec<DeviceDescriptor>) -> Self {
        Self { devices }
    }
}

impl DeviceProvider for StaticDeviceProvider {
    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        Ok(self.devices.clone())
    }
}
