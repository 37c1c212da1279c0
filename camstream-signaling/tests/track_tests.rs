//! Track adapter fallback and pacing tests

use camstream_core::{PixelFormat, Resolution, VideoFrame};
use camstream_media::CaptureFormat;
use camstream_signaling::*;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Feed whose health and frame age are scripted by the test
struct ScriptedFeed {
    healthy: AtomicBool,
    busy: AtomicBool,
    stale: AtomicBool,
    sequence: AtomicU64,
    fps: f64,
}

impl ScriptedFeed {
    fn new(fps: f64) -> Arc<Self> {
        Arc::new(Self {
            healthy: AtomicBool::new(true),
            busy: AtomicBool::new(false),
            stale: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            fps,
        })
    }
}

impl CameraFeed for ScriptedFeed {
    fn camera_id(&self) -> &str {
        "scripted"
    }

    fn latest(&self) -> Option<VideoFrame> {
        if !self.healthy.load(Ordering::SeqCst) {
            return None;
        }
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let mut frame = VideoFrame::new(
            Resolution::new(4, 2),
            PixelFormat::Bgr24,
            vec![sequence as u8; 24],
            sequence,
        );
        if self.stale.load(Ordering::SeqCst) {
            frame.captured_at = Instant::now()
                .checked_sub(Duration::from_secs(5))
                .unwrap_or(frame.captured_at);
        }
        Some(frame)
    }

    fn is_active(&self) -> bool {
        true
    }

    fn is_operation_in_progress(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn format(&self) -> CaptureFormat {
        CaptureFormat::new(4, 2, self.fps)
    }
}

fn adapter(feed: Arc<ScriptedFeed>) -> TrackAdapter {
    TrackAdapter::new(feed, TrackAdapterConfig::default())
}

// ============================================================================
// FALLBACK
// ============================================================================

#[tokio::test]
async fn test_twelfth_frame_is_synthetic_after_eleven_failures() {
    let feed = ScriptedFeed::new(1000.0);
    let track = adapter(feed.clone());

    let good = track.next_frame().await;
    assert!(!good.synthetic);

    feed.healthy.store(false, Ordering::SeqCst);
    for _ in 0..11 {
        let frame = track.next_frame().await;
        // Last good frame is repeated while failures accumulate.
        assert!(!frame.synthetic);
        assert_eq!(frame.frame.sequence, good.frame.sequence);
    }
    assert!(!track.is_active());

    // Capture would succeed now, but the track stays synthetic.
    feed.healthy.store(true, Ordering::SeqCst);
    for _ in 0..3 {
        let frame = track.next_frame().await;
        assert!(frame.synthetic);
        assert!(frame.frame.is_black());
    }

    track.restart();
    assert!(track.is_active());
    let frame = track.next_frame().await;
    assert!(!frame.synthetic);
    assert_eq!(track.consecutive_errors(), 0);
}

#[tokio::test]
async fn test_ten_failures_keep_track_active() {
    let feed = ScriptedFeed::new(1000.0);
    let track = adapter(feed.clone());

    feed.healthy.store(false, Ordering::SeqCst);
    for _ in 0..10 {
        let frame = track.next_frame().await;
        // Nothing cached yet, so failures produce black frames.
        assert!(frame.synthetic);
    }
    assert!(track.is_active());
    assert_eq!(track.consecutive_errors(), 10);

    feed.healthy.store(true, Ordering::SeqCst);
    assert!(!track.next_frame().await.synthetic);
    assert_eq!(track.consecutive_errors(), 0);
}

#[tokio::test]
async fn test_stale_frames_count_as_failures() {
    let feed = ScriptedFeed::new(1000.0);
    feed.stale.store(true, Ordering::SeqCst);
    let track = adapter(feed);

    let frame = track.next_frame().await;
    assert!(frame.synthetic);
    assert_eq!(track.consecutive_errors(), 1);
}

#[tokio::test]
async fn test_busy_camera_reuses_cached_frame() {
    let feed = ScriptedFeed::new(1000.0);
    let track = adapter(feed.clone());

    let first = track.next_frame().await;
    feed.busy.store(true, Ordering::SeqCst);
    let second = track.next_frame().await;
    assert_eq!(second.frame.sequence, first.frame.sequence);
    assert_eq!(feed.sequence.load(Ordering::SeqCst), 1);

    feed.busy.store(false, Ordering::SeqCst);
    let third = track.next_frame().await;
    assert!(third.frame.sequence > first.frame.sequence);
}

// ============================================================================
// PACING
// ============================================================================

#[tokio::test]
async fn test_frames_are_paced_to_camera_rate() {
    let feed = ScriptedFeed::new(20.0);
    let track = adapter(feed);

    let started = Instant::now();
    let mut last_pts = None;
    for _ in 0..5 {
        let frame = track.next_frame().await;
        if let Some(previous) = last_pts {
            assert_eq!(frame.pts - previous, 4_500);
        }
        last_pts = Some(frame.pts);
    }
    // Slots 0..4 are due at 0, 50, 100, 150 and 200 ms.
    assert!(started.elapsed() >= Duration::from_millis(195));
}

#[tokio::test]
async fn test_output_is_rgb() {
    let feed = ScriptedFeed::new(1000.0);
    let track = adapter(feed);
    let frame = track.next_frame().await;
    assert_eq!(frame.frame.format, PixelFormat::Rgb24);
    assert_eq!(frame.clock_rate, VIDEO_CLOCK_RATE);
}
