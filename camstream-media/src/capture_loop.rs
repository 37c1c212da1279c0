//! Dedicated capture thread
//!
//! One OS thread per camera pulls frames from the hardware handle and
//! publishes them into the camera's [`FrameBuffer`]. The thread owns the
//! handle, paces itself to the target frame rate and reinitializes the
//! device after repeated read failures. It only stops when released.

use crate::capture::{CaptureBackend, CaptureFormat, CaptureHandle};
use crate::frame_buffer::FrameBuffer;
use crate::recording::RecordingController;
use camstream_core::{CamStreamError, Result};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Consecutive read failures tolerated before the device is reopened
pub const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Capture loop states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    /// Thread not running
    Stopped,
    /// Reading and publishing frames
    Running,
    /// Last read failed; retrying or reinitializing
    ErrorBackoff,
}

/// Capture loop tuning
#[derive(Debug, Clone)]
pub struct CaptureLoopConfig {
    /// Failures in a row before a full reinitialize
    pub max_consecutive_failures: u32,
    /// Pause after a failed read
    pub retry_delay: Duration,
    /// Length of the window the FPS estimate is computed over
    pub fps_window: Duration,
}

impl Default for CaptureLoopConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: MAX_CONSECUTIVE_FAILURES,
            retry_delay: Duration::from_millis(500),
            fps_window: Duration::from_secs(1),
        }
    }
}

/// Counters shared between the capture thread and stats readers
#[derive(Debug)]
pub struct CaptureMetrics {
    frames_captured: AtomicU64,
    errors: AtomicU64,
    reinitializations: AtomicU64,
    reopen_failures: AtomicU64,
    fps_bits: AtomicU64,
    state: Mutex<CaptureState>,
}

impl Default for CaptureMetrics {
    fn default() -> Self {
        Self {
            frames_captured: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            reinitializations: AtomicU64::new(0),
            reopen_failures: AtomicU64::new(0),
            fps_bits: AtomicU64::new(0f64.to_bits()),
            state: Mutex::new(CaptureState::Stopped),
        }
    }
}

impl CaptureMetrics {
    /// Frames read successfully
    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }

    /// Failed reads
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Successful device reopens
    pub fn reinitializations(&self) -> u64 {
        self.reinitializations.load(Ordering::Relaxed)
    }

    /// Device reopens that failed
    pub fn reopen_failures(&self) -> u64 {
        self.reopen_failures.load(Ordering::Relaxed)
    }

    /// Measured frame rate over the last window
    pub fn fps(&self) -> f64 {
        f64::from_bits(self.fps_bits.load(Ordering::Relaxed))
    }

    /// Current loop state
    pub fn state(&self) -> CaptureState {
        *self.state.lock()
    }

    fn set_state(&self, state: CaptureState) {
        *self.state.lock() = state;
    }

    fn set_fps(&self, fps: f64) {
        self.fps_bits.store(fps.to_bits(), Ordering::Relaxed);
    }
}

/// Sliding frame-rate estimate
#[derive(Debug)]
struct FpsMeter {
    window: Duration,
    window_start: Instant,
    frames: u32,
}

impl FpsMeter {
    fn new(window: Duration) -> Self {
        Self {
            window,
            window_start: Instant::now(),
            frames: 0,
        }
    }

    /// Count a frame; returns a new estimate when the window closes
    fn tick(&mut self, now: Instant) -> Option<f64> {
        self.frames += 1;
        let elapsed = now.duration_since(self.window_start);
        if elapsed < self.window {
            return None;
        }
        let fps = self.frames as f64 / elapsed.as_secs_f64();
        self.frames = 0;
        self.window_start = now;
        Some(fps)
    }
}

/// Interruptible sleep used to stop the thread promptly
#[derive(Debug, Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    fn stop(&self) {
        *self.stopped.lock() = true;
        self.wake.notify_all();
    }

    fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }

    /// Sleep for `duration`; returns true if stopped meanwhile
    fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.wake.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

/// Everything the capture thread needs, moved into it at spawn
pub struct CaptureContext {
    /// Camera identifier, for logs
    pub camera_id: String,
    /// Hardware index, for reopening
    pub index: u32,
    /// Format requested on every (re)open
    pub requested: CaptureFormat,
    /// Already opened and configured device
    pub handle: Box<dyn CaptureHandle>,
    /// Used to reopen the device
    pub backend: Arc<dyn CaptureBackend>,
    /// Destination of captured frames
    pub frames: Arc<FrameBuffer>,
    /// Recorder fed with every captured frame
    pub recorder: Arc<RecordingController>,
    /// Shared counters
    pub metrics: Arc<CaptureMetrics>,
    /// Tuning
    pub config: CaptureLoopConfig,
}

/// Handle to a running capture thread
pub struct CaptureLoop {
    camera_id: String,
    signal: Arc<StopSignal>,
    metrics: Arc<CaptureMetrics>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for CaptureLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureLoop")
            .field("camera_id", &self.camera_id)
            .field("state", &self.metrics.state())
            .finish()
    }
}

impl CaptureLoop {
    /// Start the capture thread
    pub fn spawn(context: CaptureContext) -> Result<Self> {
        let camera_id = context.camera_id.clone();
        let signal = Arc::new(StopSignal::default());
        let metrics = context.metrics.clone();

        metrics.set_state(CaptureState::Running);
        let worker = CaptureWorker {
            context,
            signal: signal.clone(),
        };

        let thread = std::thread::Builder::new()
            .name(format!("capture-{}", camera_id))
            .spawn(move || worker.run())
            .map_err(|e| {
                metrics.set_state(CaptureState::Stopped);
                CamStreamError::Initialization {
                    reason: format!("failed to spawn capture thread for {}: {}", camera_id, e),
                }
            })?;

        info!(camera_id = %camera_id, "Background frame capture thread started");
        Ok(Self {
            camera_id,
            signal,
            metrics,
            thread: Some(thread),
        })
    }

    /// Current state of the loop
    pub fn state(&self) -> CaptureState {
        self.metrics.state()
    }

    /// Whether the thread is still alive
    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    /// Stop the thread, release the device and wait for it to exit
    pub fn stop(&mut self) {
        self.signal.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(camera_id = %self.camera_id, "Capture thread panicked");
            }
        }
        self.metrics.set_state(CaptureState::Stopped);
        debug!(camera_id = %self.camera_id, "Capture thread stopped");
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop();
        }
    }
}

struct CaptureWorker {
    context: CaptureContext,
    signal: Arc<StopSignal>,
}

impl CaptureWorker {
    fn run(self) {
        let CaptureWorker { context, signal } = self;
        let CaptureContext {
            camera_id,
            index,
            requested,
            handle,
            backend,
            frames,
            recorder,
            metrics,
            config,
        } = context;

        let mut handle = Some(handle);
        let mut interval = handle
            .as_ref()
            .map(|h| h.format().frame_interval())
            .unwrap_or_else(|| requested.frame_interval());
        let mut fps_meter = FpsMeter::new(config.fps_window);
        let mut consecutive_failures = 0u32;

        while !signal.is_stopped() {
            let started = Instant::now();

            // The buffer lock is not held here; a slow device only blocks this thread.
            let read = match handle.as_mut() {
                Some(device) => device.read(),
                None => Err(CamStreamError::DeviceReadFailed {
                    camera_id: camera_id.clone(),
                    reason: "device not open".to_string(),
                }),
            };

            match read {
                Ok(frame) => {
                    consecutive_failures = 0;
                    metrics.set_state(CaptureState::Running);

                    recorder.feed(&frame);
                    frames.publish(frame);

                    metrics.frames_captured.fetch_add(1, Ordering::Relaxed);
                    if let Some(fps) = fps_meter.tick(Instant::now()) {
                        metrics.set_fps(fps);
                    }

                    let remaining = interval.saturating_sub(started.elapsed());
                    if !remaining.is_zero() && signal.sleep(remaining) {
                        break;
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    metrics.errors.fetch_add(1, Ordering::Relaxed);
                    metrics.set_state(CaptureState::ErrorBackoff);

                    if consecutive_failures > config.max_consecutive_failures {
                        warn!(
                            camera_id = %camera_id,
                            failures = consecutive_failures,
                            "Failed to capture frame, attempting to reinitialize camera: {}", e
                        );
                        consecutive_failures = 0;
                        if let Some(mut old) = handle.take() {
                            old.release();
                        }
                        match reopen(backend.as_ref(), index, &requested) {
                            Ok(device) => {
                                interval = device.format().frame_interval();
                                handle = Some(device);
                                metrics.reinitializations.fetch_add(1, Ordering::Relaxed);
                                info!(camera_id = %camera_id, "Camera reinitialized");
                            }
                            Err(e) => {
                                metrics.reopen_failures.fetch_add(1, Ordering::Relaxed);
                                error!(camera_id = %camera_id, "Camera reinitialization failed: {}", e);
                            }
                        }
                    } else {
                        debug!(camera_id = %camera_id, "Frame read failed: {}", e);
                    }

                    if signal.sleep(config.retry_delay) {
                        break;
                    }
                }
            }
        }

        if let Some(mut device) = handle.take() {
            device.release();
        }
        metrics.set_state(CaptureState::Stopped);
        info!(camera_id = %camera_id, "Capture thread exiting, device released");
    }
}

/// Open and configure a device
pub(crate) fn reopen(
    backend: &dyn CaptureBackend,
    index: u32,
    requested: &CaptureFormat,
) -> Result<Box<dyn CaptureHandle>> {
    let mut handle = backend.open(index)?;
    if let Err(e) = handle.set(
        requested.resolution.width,
        requested.resolution.height,
        requested.fps,
    ) {
        handle.release();
        return Err(e);
    }
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fps_meter_reports_after_window() {
        let start = Instant::now();
        let mut meter = FpsMeter {
            window: Duration::from_secs(1),
            window_start: start,
            frames: 0,
        };
        for i in 1..30 {
            assert!(meter
                .tick(start + Duration::from_millis(i * 33))
                .is_none());
        }
        let fps = meter.tick(start + Duration::from_secs(1)).unwrap();
        assert!((fps - 30.0).abs() < 0.01);
        assert_eq!(meter.frames, 0);
    }

    #[test]
    fn test_stop_signal_interrupts_sleep() {
        let signal = Arc::new(StopSignal::default());
        let sleeper = signal.clone();
        let started = Instant::now();
        let thread = std::thread::spawn(move || sleeper.sleep(Duration::from_secs(10)));
        std::thread::sleep(Duration::from_millis(20));
        signal.stop();
        assert!(thread.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_frame_interval() {
        let format = CaptureFormat::new(640, 480, 25.0);
        assert_eq!(format.frame_interval(), Duration::from_millis(40));
    }
}
