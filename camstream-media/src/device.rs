//! Camera instances
//!
//! A [`CameraDevice`] owns one frame buffer, one capture loop and one
//! recording controller. Blocking work (opening hardware, waiting for a
//! frame, opening or closing an encoder) has a synchronous entry point and
//! an async wrapper that runs it on tokio's blocking pool.

use crate::capture::{CaptureBackend, CaptureFormat, DeviceDescriptor};
use crate::capture_loop::{
    self, CaptureContext, CaptureLoop, CaptureLoopConfig, CaptureMetrics, CaptureState,
};
use crate::frame_buffer::FrameBuffer;
use crate::recording::{RecordingController, SinkFactory};
use camstream_core::{CamStreamError, Resolution, Result, VideoFrame};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::{debug, error, info, warn};

/// Default time `capture_one` waits for a frame
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(1);

/// Static description of a configured camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Stable identifier, e.g. `camera1`
    pub id: String,
    /// Human readable name
    pub name: String,
    /// Hardware index passed to the capture backend
    pub index: u32,
    /// Requested width
    pub width: u32,
    /// Requested height
    pub height: u32,
    /// Requested frame rate
    pub fps: f64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            id: "camera1".to_string(),
            name: "Camera 1".to_string(),
            index: 0,
            width: 640,
            height: 480,
            fps: 30.0,
        }
    }
}

impl CameraConfig {
    /// Config for `id` at hardware `index` with default format
    pub fn new(id: impl Into<String>, index: u32) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            index,
            ..Default::default()
        }
    }

    /// Set the requested format
    pub fn with_format(mut self, width: u32, height: u32, fps: f64) -> Self {
        self.width = width;
        self.height = height;
        self.fps = fps;
        self
    }

    /// Requested capture format
    pub fn format(&self) -> CaptureFormat {
        CaptureFormat::new(self.width, self.height, self.fps)
    }
}

impl From<DeviceDescriptor> for CameraConfig {
    fn from(device: DeviceDescriptor) -> Self {
        Self {
            id: device.id,
            name: device.name,
            index: device.index,
            width: device.width,
            height: device.height,
            fps: device.fps,
        }
    }
}

/// Camera lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    /// Constructed, hardware not opened
    Uninitialized,
    /// Opening hardware
    Initializing,
    /// Capture loop running
    Active,
    /// Last initialization failed
    Failed,
}

/// Point-in-time camera statistics
#[derive(Debug, Clone, Serialize)]
pub struct CameraStats {
    pub camera_id: String,
    pub name: String,
    pub state: DeviceState,
    pub active: bool,
    pub recording: bool,
    pub recording_path: Option<PathBuf>,
    pub resolution: Resolution,
    pub fps_target: f64,
    pub fps_actual: f64,
    pub frames_captured: u64,
    pub errors: u64,
    pub reinitializations: u64,
    pub reopen_failures: u64,
    pub clients: usize,
    pub operation_in_progress: bool,
    pub capture_state: CaptureState,
}

/// Marks a photo or recording transition as running
struct OperationGuard<'a> {
    operations: &'a AtomicUsize,
}

impl<'a> OperationGuard<'a> {
    fn begin(operations: &'a AtomicUsize) -> Self {
        operations.fetch_add(1, Ordering::SeqCst);
        Self { operations }
    }
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.operations.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One configured camera
pub struct CameraDevice {
    config: CameraConfig,
    backend: Arc<dyn CaptureBackend>,
    frames: Arc<FrameBuffer>,
    recorder: Arc<RecordingController>,
    metrics: Arc<CaptureMetrics>,
    state: Mutex<DeviceState>,
    /// Serializes initialize and release
    lifecycle: Mutex<()>,
    capture: Mutex<Option<CaptureLoop>>,
    /// Format the device actually delivers once open
    actual_format: Mutex<Option<CaptureFormat>>,
    clients: Mutex<HashSet<String>>,
    operations: AtomicUsize,
    capture_timeout: Duration,
    loop_config: CaptureLoopConfig,
}

impl std::fmt::Debug for CameraDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraDevice")
            .field("id", &self.config.id)
            .field("index", &self.config.index)
            .field("state", &self.state())
            .finish()
    }
}

impl CameraDevice {
    /// Construct a camera. Hardware is not touched until [`CameraDevice::initialize`].
    pub fn new(
        config: CameraConfig,
        backend: Arc<dyn CaptureBackend>,
        sinks: Arc<dyn SinkFactory>,
    ) -> Self {
        let recorder = Arc::new(RecordingController::new(config.id.clone(), sinks));
        Self {
            config,
            backend,
            frames: Arc::new(FrameBuffer::new()),
            recorder,
            metrics: Arc::new(CaptureMetrics::default()),
            state: Mutex::new(DeviceState::Uninitialized),
            lifecycle: Mutex::new(()),
            capture: Mutex::new(None),
            actual_format: Mutex::new(None),
            clients: Mutex::new(HashSet::new()),
            operations: AtomicUsize::new(0),
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
            loop_config: CaptureLoopConfig::default(),
        }
    }

    /// Override how long `capture_one` waits for a frame
    pub fn with_capture_timeout(mut self, timeout: Duration) -> Self {
        self.capture_timeout = timeout;
        self
    }

    /// Override capture loop tuning
    pub fn with_loop_config(mut self, config: CaptureLoopConfig) -> Self {
        self.loop_config = config;
        self
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    pub fn state(&self) -> DeviceState {
        *self.state.lock()
    }

    /// Whether the capture loop is running
    pub fn is_active(&self) -> bool {
        self.state() == DeviceState::Active
    }

    /// Shared frame cell of this camera
    pub fn frame_buffer(&self) -> &Arc<FrameBuffer> {
        &self.frames
    }

    pub fn recorder(&self) -> &Arc<RecordingController> {
        &self.recorder
    }

    /// Format in use: the negotiated one once open, the requested one before
    pub fn format(&self) -> CaptureFormat {
        self.actual_format
            .lock()
            .unwrap_or_else(|| self.config.format())
    }

    /// Newest frame, possibly stale. Never waits.
    pub fn latest_frame(&self) -> Option<VideoFrame> {
        self.frames.peek()
    }

    /// Open the hardware and start the capture loop. No-op when active.
    ///
    /// Blocks on device I/O; async callers use [`CameraDevice::initialize_async`].
    pub fn initialize(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        if self.capture.lock().is_some() {
            return Ok(());
        }

        self.set_state(DeviceState::Initializing);
        info!(camera_id = %self.config.id, index = self.config.index, "Initializing camera");

        match self.start_capture() {
            Ok(format) => {
                self.set_state(DeviceState::Active);
                info!(
                    camera_id = %self.config.id,
                    "📷 Camera initialized ({} @ {} fps)", format.resolution, format.fps
                );
                Ok(())
            }
            Err(e) => {
                self.set_state(DeviceState::Failed);
                error!(camera_id = %self.config.id, "Camera initialization failed: {}", e);
                Err(e)
            }
        }
    }

    fn start_capture(&self) -> Result<CaptureFormat> {
        let requested = self.config.format();
        let mut handle = capture_loop::reopen(self.backend.as_ref(), self.config.index, &requested)
            .map_err(|e| self.open_failed(e))?;

        let actual = handle.format();
        if actual != requested {
            warn!(
                camera_id = %self.config.id,
                "Camera negotiated {} @ {} fps instead of {} @ {} fps",
                actual.resolution, actual.fps, requested.resolution, requested.fps
            );
        }

        // A device that opens but never delivers is treated as failed.
        match handle.read() {
            Ok(frame) => self.frames.publish(frame),
            Err(e) => {
                handle.release();
                return Err(self.open_failed(e));
            }
        }

        let capture = CaptureLoop::spawn(CaptureContext {
            camera_id: self.config.id.clone(),
            index: self.config.index,
            requested,
            handle,
            backend: self.backend.clone(),
            frames: self.frames.clone(),
            recorder: self.recorder.clone(),
            metrics: self.metrics.clone(),
            config: self.loop_config.clone(),
        })?;

        *self.actual_format.lock() = Some(actual);
        *self.capture.lock() = Some(capture);
        Ok(actual)
    }

    fn open_failed(&self, error: CamStreamError) -> CamStreamError {
        let reason = match error {
            CamStreamError::DeviceOpenFailed { reason, .. } => reason,
            other => other.to_string(),
        };
        CamStreamError::DeviceOpenFailed {
            camera_id: self.config.id.clone(),
            index: self.config.index,
            reason,
        }
    }

    /// Stop recording and capture, release the hardware
    pub fn release(&self) {
        let _lifecycle = self.lifecycle.lock();

        if let Err(e) = self.recorder.stop() {
            warn!(camera_id = %self.config.id, "Error stopping recording during release: {}", e);
        }

        let capture = self.capture.lock().take();
        if let Some(mut capture) = capture {
            capture.stop();
        }

        self.frames.clear();
        *self.actual_format.lock() = None;
        self.set_state(DeviceState::Uninitialized);
        info!(camera_id = %self.config.id, "Camera released");
    }

    /// Record a failed initialization that happened outside `initialize`
    pub fn mark_failed(&self) {
        if self.capture.lock().is_none() {
            self.set_state(DeviceState::Failed);
        }
    }

    fn set_state(&self, state: DeviceState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!(camera_id = %self.config.id, from = ?*current, to = ?state, "Camera state change");
            *current = state;
        }
    }

    /// [`CameraDevice::initialize`] on the blocking pool
    pub async fn initialize_async(self: &Arc<Self>) -> Result<()> {
        let device = self.clone();
        run_blocking(move || device.initialize()).await
    }

    /// [`CameraDevice::release`] on the blocking pool
    pub async fn release_async(self: &Arc<Self>) -> Result<()> {
        let device = self.clone();
        run_blocking(move || {
            device.release();
            Ok(())
        })
        .await
    }

    /// Wait for the next published frame.
    ///
    /// Initializes the camera first if needed. Fails with
    /// [`CamStreamError::DeviceReadTimeout`] when no frame arrives in time.
    /// If the returned future is dropped while waiting, the blocking waiter
    /// gives up on its next wake-up without consuming the frame.
    pub async fn capture_one(self: &Arc<Self>) -> Result<VideoFrame> {
        if !self.is_active() {
            self.initialize_async().await?;
        }

        let _operation = OperationGuard::begin(&self.operations);
        let frames = self.frames.clone();
        let timeout = self.capture_timeout;
        let (_waiting, mut abandoned) = oneshot::channel::<()>();
        let frame = run_blocking(move || {
            Ok(frames.acquire_latest_unless(timeout, || {
                matches!(abandoned.try_recv(), Err(TryRecvError::Closed))
            }))
        })
        .await?;

        frame.ok_or_else(|| CamStreamError::DeviceReadTimeout {
            camera_id: self.config.id.clone(),
            timeout,
        })
    }

    /// Start recording to `path`. No-op if already recording.
    pub async fn start_recording(self: &Arc<Self>, path: impl Into<PathBuf>) -> Result<()> {
        if !self.is_active() {
            return Err(CamStreamError::CameraNotActive {
                camera_id: self.config.id.clone(),
            });
        }

        let _operation = OperationGuard::begin(&self.operations);
        let path = path.into();
        let format = self.format();
        let recorder = self.recorder.clone();
        run_blocking(move || recorder.start(&path, &format)).await
    }

    /// Stop recording. Returns the output path, or `None` if not recording.
    pub async fn stop_recording(self: &Arc<Self>) -> Result<Option<PathBuf>> {
        let _operation = OperationGuard::begin(&self.operations);
        let recorder = self.recorder.clone();
        run_blocking(move || recorder.stop()).await
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    /// Whether a photo capture or recording transition is running
    pub fn is_operation_in_progress(&self) -> bool {
        self.operations.load(Ordering::SeqCst) > 0
    }

    /// Register a consumer for accounting. Returns false if already present.
    pub fn register_client(&self, client_id: &str) -> bool {
        let added = self.clients.lock().insert(client_id.to_string());
        if added {
            debug!(camera_id = %self.config.id, client_id, "Client registered");
        }
        added
    }

    /// Remove a consumer. Returns false if it was not registered.
    pub fn unregister_client(&self, client_id: &str) -> bool {
        let removed = self.clients.lock().remove(client_id);
        if removed {
            debug!(camera_id = %self.config.id, client_id, "Client unregistered");
        }
        removed
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Current statistics
    pub fn stats(&self) -> CameraStats {
        let format = self.format();
        CameraStats {
            camera_id: self.config.id.clone(),
            name: self.config.name.clone(),
            state: self.state(),
            active: self.is_active(),
            recording: self.recorder.is_recording(),
            recording_path: self.recorder.current_path(),
            resolution: format.resolution,
            fps_target: self.config.fps,
            fps_actual: self.metrics.fps(),
            frames_captured: self.metrics.frames_captured(),
            errors: self.metrics.errors(),
            reinitializations: self.metrics.reinitializations(),
            reopen_failures: self.metrics.reopen_failures(),
            clients: self.client_count(),
            operation_in_progress: self.is_operation_in_progress(),
            capture_state: self.metrics.state(),
        }
    }
}

/// Run blocking work on tokio's bounded blocking pool
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| CamStreamError::WorkerPool {
            reason: format!("Thread pool error: {}", e),
        })?
}
