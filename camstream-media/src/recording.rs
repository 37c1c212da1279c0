//! Video recording against the capture stream
//!
//! The capture thread feeds every frame to [`RecordingController::feed`];
//! the controller forwards it to the open encode sink if a recording is
//! running. Start and stop transitions are serialized per camera.

use crate::capture::CaptureFormat;
use camstream_core::{CamStreamError, Result, VideoFrame};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// An open video encoder writing to a file
pub trait EncodeSink: Send {
    /// Encode one frame
    fn write(&mut self, frame: &VideoFrame) -> Result<()>;

    /// Flush and close the output
    fn close(self: Box<Self>) -> Result<()>;
}

/// Opens encode sinks
pub trait SinkFactory: Send + Sync {
    /// Open a sink at `path` for frames of the given size and rate
    fn open(&self, path: &Path, fps: f64, width: u32, height: u32) -> Result<Box<dyn EncodeSink>>;
}

/// A running recording
pub struct RecordingSession {
    path: PathBuf,
    sink: Box<dyn EncodeSink>,
    frames_written: u64,
    write_errors: u64,
}

impl RecordingSession {
    /// Output path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frames encoded so far
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

/// Serializes start/stop of one camera's encode sink
pub struct RecordingController {
    camera_id: String,
    factory: Arc<dyn SinkFactory>,
    /// Held for the whole of a start or stop transition
    transition: Mutex<()>,
    /// Only touched by `feed` and by transitions, never across sink open/close
    session: Mutex<Option<RecordingSession>>,
    recording: AtomicBool,
    frames_total: AtomicU64,
}

impl std::fmt::Debug for RecordingController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingController")
            .field("camera_id", &self.camera_id)
            .field("recording", &self.is_recording())
            .finish()
    }
}

impl RecordingController {
    /// Create an idle controller
    pub fn new(camera_id: impl Into<String>, factory: Arc<dyn SinkFactory>) -> Self {
        Self {
            camera_id: camera_id.into(),
            factory,
            transition: Mutex::new(()),
            session: Mutex::new(None),
            recording: AtomicBool::new(false),
            frames_total: AtomicU64::new(0),
        }
    }

    /// Whether a sink is open
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    /// Output path of the running recording
    pub fn current_path(&self) -> Option<PathBuf> {
        self.session.lock().as_ref().map(|s| s.path.clone())
    }

    /// Frames written by the running recording
    pub fn frames_written(&self) -> u64 {
        self.session
            .lock()
            .as_ref()
            .map(|s| s.frames_written)
            .unwrap_or(0)
    }

    /// Frames written across all recordings of this camera
    pub fn total_frames_written(&self) -> u64 {
        self.frames_total.load(Ordering::Relaxed)
    }

    /// Open a sink at `path` and start recording. No-op if already recording.
    pub fn start(&self, path: &Path, format: &CaptureFormat) -> Result<()> {
        let _transition = self.transition.lock();
        if self.is_recording() {
            debug!(camera_id = %self.camera_id, "Recording already running, ignoring start");
            return Ok(());
        }

        let sink = self.factory.open(
            path,
            format.fps,
            format.resolution.width,
            format.resolution.height,
        )?;

        *self.session.lock() = Some(RecordingSession {
            path: path.to_path_buf(),
            sink,
            frames_written: 0,
            write_errors: 0,
        });
        self.recording.store(true, Ordering::SeqCst);

        info!(camera_id = %self.camera_id, path = %path.display(), "🔴 Started recording");
        Ok(())
    }

    /// Stop recording and return the output path. `Ok(None)` if not recording.
    ///
    /// The recording flag is cleared before the sink is closed so the capture
    /// thread stops feeding it first. If closing fails the session is still
    /// dropped and the error is returned.
    pub fn stop(&self) -> Result<Option<PathBuf>> {
        let _transition = self.transition.lock();
        if !self.recording.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }

        // Waits for an in-flight `feed` to finish its write.
        let session = self.session.lock().take();
        let Some(session) = session else {
            warn!(camera_id = %self.camera_id, "Recording flag was set without a session");
            return Ok(None);
        };

        let RecordingSession {
            path,
            sink,
            frames_written,
            write_errors,
        } = session;

        if let Err(e) = sink.close() {
            error!(camera_id = %self.camera_id, path = %path.display(), "Failed to close recording: {}", e);
            return Err(CamStreamError::SinkCloseFailed {
                path,
                reason: e.to_string(),
            });
        }

        info!(
            camera_id = %self.camera_id,
            path = %path.display(),
            frames_written,
            write_errors,
            "⏹️ Stopped recording"
        );
        Ok(Some(path))
    }

    /// Hand a captured frame to the sink if recording.
    ///
    /// Write failures are logged and counted, never propagated to the
    /// capture loop.
    pub fn feed(&self, frame: &VideoFrame) {
        if !self.is_recording() {
            return;
        }

        let mut session = self.session.lock();
        if let Some(session) = session.as_mut() {
            match session.sink.write(frame) {
                Ok(()) => {
                    session.frames_written += 1;
                    self.frames_total.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    session.write_errors += 1;
                    warn!(camera_id = %self.camera_id, "Error writing video frame: {}", e);
                }
            }
        }
    }
}
