//! Single-slot shared frame cell
//!
//! The capture thread is the only writer. Any number of consumers read by
//! copying the current frame out under a short critical section. Only the
//! newest frame matters, so there is no queue: a publish overwrites whatever
//! was there.

use camstream_core::VideoFrame;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Default)]
struct Slots {
    /// Last fully published frame
    current: Option<VideoFrame>,
    /// Previous frame, kept so a publish is a swap rather than a drop under the lock
    staging: Option<VideoFrame>,
    /// Set by publish, cleared by `acquire_latest`
    ready: bool,
    published: u64,
}

/// Overwrite-on-write frame mailbox with wait/notify
#[derive(Default)]
pub struct FrameBuffer {
    slots: Mutex<Slots>,
    frame_ready: Condvar,
    readers: AtomicUsize,
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("published", &self.published_count())
            .field("readers", &self.reader_count())
            .finish()
    }
}

impl FrameBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current frame and wake waiting consumers.
    ///
    /// The frame is fully built before this call, so readers only ever see
    /// complete frames. Never waits on readers beyond the swap itself.
    pub fn publish(&self, frame: VideoFrame) {
        let displaced = {
            let mut guard = self.slots.lock();
            let slots = &mut *guard;
            let displaced = slots.staging.replace(frame);
            std::mem::swap(&mut slots.current, &mut slots.staging);
            slots.ready = true;
            slots.published += 1;
            displaced
        };
        self.frame_ready.notify_all();
        // Frame from two publishes ago is freed outside the critical section.
        drop(displaced);
    }

    /// Wait until a frame is published or `timeout` elapses.
    ///
    /// Returns a copy of the newest frame and consumes the readiness signal,
    /// so an immediate second call waits for the next publish. `None` means
    /// the timeout expired.
    pub fn acquire_latest(&self, timeout: Duration) -> Option<VideoFrame> {
        self.acquire_latest_unless(timeout, || false)
    }

    /// [`FrameBuffer::acquire_latest`] for a waiter that may be abandoned.
    ///
    /// `abandoned` is checked after waking and before the readiness signal is
    /// consumed; once it returns true the call yields `None` and leaves the
    /// signal for the next caller.
    pub fn acquire_latest_unless(
        &self,
        timeout: Duration,
        mut abandoned: impl FnMut() -> bool,
    ) -> Option<VideoFrame> {
        let deadline = Instant::now() + timeout;
        let mut slots = self.slots.lock();
        while !slots.ready {
            if self.frame_ready.wait_until(&mut slots, deadline).timed_out() {
                if !slots.ready {
                    return None;
                }
                break;
            }
        }
        if abandoned() {
            return None;
        }
        slots.ready = false;
        slots.current.clone()
    }

    /// Copy of the newest frame without touching the readiness signal
    pub fn peek(&self) -> Option<VideoFrame> {
        self.slots.lock().current.clone()
    }

    /// Whether a publish happened since the last `acquire_latest`
    pub fn is_ready(&self) -> bool {
        self.slots.lock().ready
    }

    /// Number of frames published so far
    pub fn published_count(&self) -> u64 {
        self.slots.lock().published
    }

    /// Drop the stored frames and reset the signal
    pub fn clear(&self) {
        let mut slots = self.slots.lock();
        slots.current = None;
        slots.staging = None;
        slots.ready = false;
    }

    /// Register a consumer; the count drops when the guard is dropped
    pub fn register_reader(self: &Arc<Self>) -> ReaderGuard {
        self.readers.fetch_add(1, Ordering::SeqCst);
        ReaderGuard {
            buffer: self.clone(),
        }
    }

    /// Number of registered consumers
    pub fn reader_count(&self) -> usize {
        self.readers.load(Ordering::SeqCst)
    }
}

/// Keeps a consumer registered on a [`FrameBuffer`]
#[derive(Debug)]
pub struct ReaderGuard {
    buffer: Arc<FrameBuffer>,
}

impl ReaderGuard {
    /// The buffer this guard is registered on
    pub fn buffer(&self) -> &Arc<FrameBuffer> {
        &self.buffer
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.buffer.readers.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camstream_core::{PixelFormat, Resolution};

    fn frame(sequence: u64) -> VideoFrame {
        VideoFrame::new(
            Resolution::new(2, 2),
            PixelFormat::Bgr24,
            vec![sequence as u8; 12],
            sequence,
        )
    }

    #[test]
    fn test_empty_buffer() {
        let buffer = FrameBuffer::new();
        assert!(buffer.peek().is_none());
        assert!(!buffer.is_ready());
        assert!(buffer.acquire_latest(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_publish_overwrites() {
        let buffer = FrameBuffer::new();
        buffer.publish(frame(1));
        buffer.publish(frame(2));
        assert_eq!(buffer.peek().map(|f| f.sequence), Some(2));
        assert_eq!(buffer.published_count(), 2);
    }

    #[test]
    fn test_peek_does_not_consume_signal() {
        let buffer = FrameBuffer::new();
        buffer.publish(frame(1));
        assert!(buffer.peek().is_some());
        assert!(buffer.is_ready());
        assert_eq!(
            buffer
                .acquire_latest(Duration::from_millis(10))
                .map(|f| f.sequence),
            Some(1)
        );
        assert!(!buffer.is_ready());
        // Stale frame is still there for peek.
        assert_eq!(buffer.peek().map(|f| f.sequence), Some(1));
    }

    #[test]
    fn test_reader_registration() {
        let buffer = Arc::new(FrameBuffer::new());
        let first = buffer.register_reader();
        let second = buffer.register_reader();
        assert_eq!(buffer.reader_count(), 2);
        drop(first);
        assert_eq!(buffer.reader_count(), 1);
        drop(second);
        assert_eq!(buffer.reader_count(), 0);
    }

    #[test]
    fn test_clear() {
        let buffer = FrameBuffer::new();
        buffer.publish(frame(1));
        buffer.clear();
        assert!(buffer.peek().is_none());
        assert!(!buffer.is_ready());
    }
}
