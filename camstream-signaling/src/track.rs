//! Per-session video track
//!
//! [`TrackAdapter`] sits between a camera's frame buffer and the transport.
//! It paces output to the camera frame rate, shields the session from
//! capture hiccups by repeating the last good frame, and falls back to black
//! frames once the camera has failed too often in a row.

use crate::transport::{TransportFrame, VideoSource, VIDEO_CLOCK_RATE};
use async_trait::async_trait;
use camstream_core::{PixelFormat, Resolution, VideoFrame};
use camstream_media::{CameraDevice, CaptureFormat, ReaderGuard};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Consecutive failed reads tolerated before the track goes synthetic
pub const DEFAULT_ERROR_THRESHOLD: u32 = 10;

/// Frames older than this count as a failed read
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_millis(500);

/// What a track needs from a camera
pub trait CameraFeed: Send + Sync {
    /// Camera identifier
    fn camera_id(&self) -> &str;

    /// Newest frame without consuming the readiness signal
    fn latest(&self) -> Option<VideoFrame>;

    /// Whether the capture loop is running
    fn is_active(&self) -> bool;

    /// Whether a photo capture or recording transition is running
    fn is_operation_in_progress(&self) -> bool;

    /// Format frames are delivered in
    fn format(&self) -> CaptureFormat;

    /// Register the track as a reader of the camera's frame buffer
    fn register_reader(&self) -> Option<ReaderGuard> {
        None
    }
}

impl CameraFeed for CameraDevice {
    fn camera_id(&self) -> &str {
        self.id()
    }

    fn latest(&self) -> Option<VideoFrame> {
        self.latest_frame()
    }

    fn is_active(&self) -> bool {
        CameraDevice::is_active(self)
    }

    fn is_operation_in_progress(&self) -> bool {
        CameraDevice::is_operation_in_progress(self)
    }

    fn format(&self) -> CaptureFormat {
        CameraDevice::format(self)
    }

    fn register_reader(&self) -> Option<ReaderGuard> {
        Some(self.frame_buffer().register_reader())
    }
}

/// Track tuning
#[derive(Debug, Clone)]
pub struct TrackAdapterConfig {
    /// Failures in a row after which only black frames are emitted
    pub error_threshold: u32,
    /// Maximum age of a frame read from the camera
    pub stale_after: Duration,
}

impl Default for TrackAdapterConfig {
    fn default() -> Self {
        Self {
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }
}

#[derive(Default)]
struct Cadence {
    started: Option<Instant>,
    produced: u64,
}

#[derive(Default)]
struct FrameCache {
    last_good: Option<VideoFrame>,
    consecutive_errors: u32,
}

/// Paced, failure-tolerant frame source for one session
pub struct TrackAdapter {
    feed: Arc<dyn CameraFeed>,
    config: TrackAdapterConfig,
    format: CaptureFormat,
    cadence: Mutex<Cadence>,
    cache: Mutex<FrameCache>,
    active: AtomicBool,
    _reader: Option<ReaderGuard>,
}

impl std::fmt::Debug for TrackAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackAdapter")
            .field("camera_id", &self.feed.camera_id())
            .field("active", &self.is_active())
            .field("consecutive_errors", &self.consecutive_errors())
            .finish()
    }
}

impl TrackAdapter {
    /// Track reading from `feed` at the feed's frame rate
    pub fn new(feed: Arc<dyn CameraFeed>, config: TrackAdapterConfig) -> Self {
        let format = feed.format();
        let reader = feed.register_reader();
        info!(
            camera_id = %feed.camera_id(),
            "🎥 Created video track ({} @ {} fps)", format.resolution, format.fps
        );
        Self {
            feed,
            config,
            format,
            cadence: Mutex::new(Cadence::default()),
            cache: Mutex::new(FrameCache::default()),
            active: AtomicBool::new(true),
            _reader: reader,
        }
    }

    /// Whether camera frames are being emitted
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Failed reads since the last good frame
    pub fn consecutive_errors(&self) -> u32 {
        self.cache.lock().consecutive_errors
    }

    /// Frames produced so far
    pub fn frames_produced(&self) -> u64 {
        self.cadence.lock().produced
    }

    /// Resume emitting camera frames and reset the error counter
    pub fn restart(&self) {
        self.cache.lock().consecutive_errors = 0;
        if !self.active.swap(true, Ordering::SeqCst) {
            info!(camera_id = %self.feed.camera_id(), "Video track restarted");
        }
    }

    /// Emit only black frames from now on
    pub fn stop(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            debug!(camera_id = %self.feed.camera_id(), "Video track stopped");
        }
    }

    fn frame_interval(&self) -> Duration {
        self.format.frame_interval()
    }

    /// Reserve the next slot: its number and the instant it is due
    fn next_slot(&self) -> (u64, Instant) {
        let mut cadence = self.cadence.lock();
        let started = *cadence.started.get_or_insert_with(Instant::now);
        let slot = cadence.produced;
        cadence.produced += 1;
        let offset = self.frame_interval().mul_f64(slot as f64);
        (slot, started + offset)
    }

    fn black_frame(&self) -> VideoFrame {
        let resolution = self
            .cache
            .lock()
            .last_good
            .as_ref()
            .map(|f| f.resolution())
            .unwrap_or(self.format.resolution);
        VideoFrame::black(resolution, PixelFormat::Rgb24)
    }

    fn read_camera(&self) -> std::result::Result<VideoFrame, &'static str> {
        if !self.feed.is_active() {
            return Err("camera not active");
        }
        let frame = self.feed.latest().ok_or("no frame available")?;
        if frame.age() > self.config.stale_after {
            return Err("stale frame");
        }
        Ok(frame.to_rgb())
    }

    /// Pick the frame for the current slot. Returns the frame and whether
    /// it was generated.
    fn select_frame(&self) -> (VideoFrame, bool) {
        if !self.is_active() {
            return (self.black_frame(), true);
        }

        if self.feed.is_operation_in_progress() {
            if let Some(cached) = self.cache.lock().last_good.clone() {
                return (cached, false);
            }
        }

        match self.read_camera() {
            Ok(frame) => {
                let mut cache = self.cache.lock();
                cache.last_good = Some(frame.clone());
                cache.consecutive_errors = 0;
                (frame, false)
            }
            Err(reason) => {
                let fallback = {
                    let mut cache = self.cache.lock();
                    cache.consecutive_errors += 1;
                    if cache.consecutive_errors > self.config.error_threshold
                        && self.active.swap(false, Ordering::SeqCst)
                    {
                        warn!(
                            camera_id = %self.feed.camera_id(),
                            errors = cache.consecutive_errors,
                            "Too many capture failures, video track switching to black frames"
                        );
                    } else {
                        debug!(camera_id = %self.feed.camera_id(), "Frame read failed: {}", reason);
                    }
                    cache.last_good.clone()
                };
                match fallback {
                    Some(frame) => (frame, false),
                    None => (self.black_frame(), true),
                }
            }
        }
    }

    fn pts(&self, slot: u64) -> u64 {
        let fps = if self.format.fps > 0.0 { self.format.fps } else { 30.0 };
        (slot as f64 * VIDEO_CLOCK_RATE as f64 / fps).round() as u64
    }

    /// Frame size emitted when no camera frame has been seen
    pub fn resolution(&self) -> Resolution {
        self.format.resolution
    }
}

#[async_trait]
impl VideoSource for TrackAdapter {
    async fn next_frame(&self) -> TransportFrame {
        let (slot, due) = self.next_slot();
        if Instant::now() < due {
            tokio::time::sleep_until(due.into()).await;
        }

        let (frame, synthetic) = self.select_frame();
        TransportFrame {
            frame,
            pts: self.pts(slot),
            clock_rate: VIDEO_CLOCK_RATE,
            synthetic,
        }
    }
}
