//! # CamStream Media
//!
//! Per-camera capture engine for CamStream. Each camera runs a dedicated
//! capture thread that publishes into a single-slot frame buffer; recording,
//! photo capture, broadcast and streaming tracks all read from that buffer.

#![warn(clippy::all)]

pub mod broadcast;
pub mod capture;
pub mod capture_loop;
pub mod device;
pub mod frame_buffer;
pub mod recording;
pub mod registry;
pub mod y4m;

// Re-export main types
pub use broadcast::{FrameBroadcaster, DEFAULT_MAX_CLIENTS};
pub use capture::{
    CaptureBackend, CaptureFormat, CaptureHandle, DeviceDescriptor, DeviceProvider,
    StaticDeviceProvider, SyntheticBackend, SyntheticDeviceProvider,
};
pub use capture_loop::{
    CaptureLoop, CaptureLoopConfig, CaptureMetrics, CaptureState, MAX_CONSECUTIVE_FAILURES,
};
pub use device::{CameraConfig, CameraDevice, CameraStats, DeviceState, DEFAULT_CAPTURE_TIMEOUT};
pub use frame_buffer::{FrameBuffer, ReaderGuard};
pub use recording::{EncodeSink, RecordingController, RecordingSession, SinkFactory};
pub use registry::{CameraRegistry, InitPolicy, StartupReport};
pub use y4m::{Y4mSink, Y4mSinkFactory};
