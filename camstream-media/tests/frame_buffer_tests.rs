//! Frame buffer concurrency tests
//!
//! Exercise publish/acquire under real threads: atomicity of publish, the
//! consume-on-acquire readiness signal and wake-up latency.

use camstream_core::{PixelFormat, Resolution, VideoFrame};
use camstream_media::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn uniform_frame(sequence: u64) -> VideoFrame {
    let resolution = Resolution::new(64, 48);
    let fill = (sequence % 256) as u8;
    VideoFrame::new(
        resolution,
        PixelFormat::Bgr24,
        vec![fill; resolution.pixel_count() * 3],
        sequence,
    )
}

// ============================================================================
// ABANDONED WAITERS
// ============================================================================

#[test]
fn test_abandoned_waiter_leaves_frame_for_next_caller() {
    let buffer = Arc::new(FrameBuffer::new());
    let abandoned = Arc::new(AtomicBool::new(false));

    let waiter = {
        let buffer = buffer.clone();
        let abandoned = abandoned.clone();
        thread::spawn(move || {
            buffer.acquire_latest_unless(Duration::from_secs(2), || abandoned.load(Ordering::SeqCst))
        })
    };

    thread::sleep(Duration::from_millis(50));
    abandoned.store(true, Ordering::SeqCst);
    buffer.publish(uniform_frame(7));

    assert!(waiter.join().unwrap().is_none());
    assert!(buffer.is_ready());
    let frame = buffer.acquire_latest(Duration::ZERO).unwrap();
    assert_eq!(frame.sequence, 7);
    assert!(!buffer.is_ready());
}

#[test]
fn test_live_waiter_consumes_signal() {
    let buffer = FrameBuffer::new();
    buffer.publish(uniform_frame(3));
    let frame = buffer.acquire_latest_unless(Duration::ZERO, || false).unwrap();
    assert_eq!(frame.sequence, 3);
    assert!(buffer.acquire_latest(Duration::ZERO).is_none());
}

// ============================================================================
// ATOMICITY
// ============================================================================

#[test]
fn test_readers_never_observe_mixed_frames() {
    let buffer = Arc::new(FrameBuffer::new());
    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let buffer = buffer.clone();
        let done = done.clone();
        thread::spawn(move || {
            for sequence in 1..=2_000u64 {
                buffer.publish(uniform_frame(sequence));
            }
            done.store(true, Ordering::SeqCst);
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|i| {
            let buffer = buffer.clone();
            let done = done.clone();
            thread::spawn(move || {
                let _guard = buffer.register_reader();
                let mut observed = 0u32;
                while !done.load(Ordering::SeqCst) {
                    let frame = if i % 2 == 0 {
                        buffer.peek()
                    } else {
                        buffer.acquire_latest(Duration::from_millis(5))
                    };
                    if let Some(frame) = frame {
                        assert!(frame.is_well_formed());
                        let first = frame.data[0];
                        assert!(frame.data.iter().all(|b| *b == first));
                        assert_eq!(first, (frame.sequence % 256) as u8);
                        observed += 1;
                    }
                }
                observed
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(buffer.published_count(), 2_000);
    assert_eq!(buffer.reader_count(), 0);
    assert_eq!(buffer.peek().map(|f| f.sequence), Some(2_000));
}

// ============================================================================
// READINESS SIGNAL
// ============================================================================

#[test]
fn test_second_acquire_waits_for_next_publish() {
    let buffer = FrameBuffer::new();
    buffer.publish(uniform_frame(1));

    assert_eq!(
        buffer
            .acquire_latest(Duration::from_millis(50))
            .map(|f| f.sequence),
        Some(1)
    );

    let started = Instant::now();
    assert!(buffer.acquire_latest(Duration::from_millis(50)).is_none());
    assert!(started.elapsed() >= Duration::from_millis(45));
}

#[test]
fn test_acquire_wakes_on_publish() {
    let buffer = Arc::new(FrameBuffer::new());
    let publisher = {
        let buffer = buffer.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            buffer.publish(uniform_frame(7));
        })
    };

    let started = Instant::now();
    let frame = buffer.acquire_latest(Duration::from_secs(2));
    let waited = started.elapsed();
    publisher.join().unwrap();

    assert_eq!(frame.map(|f| f.sequence), Some(7));
    assert!(waited < Duration::from_secs(1));
}

// ============================================================================
// LATENCY WITH A LIVE CAPTURE LOOP
// ============================================================================

#[test]
fn test_live_capture_latency_at_30_fps() {
    let camera = CameraDevice::new(
        CameraConfig::new("camera1", 0).with_format(32, 24, 30.0),
        Arc::new(SyntheticBackend::new()),
        Arc::new(Y4mSinkFactory::new()),
    );
    camera.initialize().unwrap();

    let buffer = camera.frame_buffer().clone();
    // Consume whatever is already there so the next acquire needs a fresh publish.
    let _ = buffer.acquire_latest(Duration::from_secs(1));

    let started = Instant::now();
    let frame = buffer.acquire_latest(Duration::from_secs(1));
    let waited = started.elapsed();

    assert!(frame.is_some());
    // One frame interval is ~33ms; leave headroom for a loaded test machine.
    assert!(waited < Duration::from_millis(250), "waited {:?}", waited);

    camera.release();
}
