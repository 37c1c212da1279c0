//! Fan-out of a camera's frames to push-style clients
//!
//! A background task samples the camera's newest frame at the camera frame
//! rate and sends it to every subscriber. Slow subscribers lag and skip
//! frames; they never hold up the others.

use crate::device::CameraDevice;
use camstream_core::{CamStreamError, Result, VideoFrame};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default subscriber limit
pub const DEFAULT_MAX_CLIENTS: usize = 5;

struct BroadcastTask {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Per-camera frame broadcaster
pub struct FrameBroadcaster {
    camera: Arc<CameraDevice>,
    sender: broadcast::Sender<VideoFrame>,
    max_clients: usize,
    /// Makes the limit check and the subscribe a single step
    admission: Mutex<()>,
    task: Mutex<Option<BroadcastTask>>,
    frames_sent: Arc<AtomicU64>,
}

impl std::fmt::Debug for FrameBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBroadcaster")
            .field("camera_id", &self.camera.id())
            .field("clients", &self.client_count())
            .field("running", &self.is_running())
            .finish()
    }
}

impl FrameBroadcaster {
    /// Broadcaster for `camera` accepting at most `max_clients` subscribers
    pub fn new(camera: Arc<CameraDevice>, max_clients: usize) -> Self {
        // A couple of frames of slack; laggards skip ahead.
        let (sender, _) = broadcast::channel(2);
        Self {
            camera,
            sender,
            max_clients,
            admission: Mutex::new(()),
            task: Mutex::new(None),
            frames_sent: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Add a subscriber
    pub fn subscribe(&self) -> Result<broadcast::Receiver<VideoFrame>> {
        let _admission = self.admission.lock();
        if self.sender.receiver_count() >= self.max_clients {
            warn!(camera_id = %self.camera.id(), limit = self.max_clients, "Broadcast client limit reached");
            return Err(CamStreamError::ResourceLimit {
                resource: "broadcast clients".to_string(),
                limit: self.max_clients,
            });
        }
        let receiver = self.sender.subscribe();
        debug!(camera_id = %self.camera.id(), clients = self.sender.receiver_count(), "Broadcast client subscribed");
        Ok(receiver)
    }

    /// Connected subscribers
    pub fn client_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    /// Frames handed to the channel so far
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|t| !t.handle.is_finished())
            .unwrap_or(false)
    }

    /// Start the sampling task. No-op when already running.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.as_ref().map(|t| !t.handle.is_finished()).unwrap_or(false) {
            return;
        }

        let (cancel, mut cancelled) = watch::channel(false);
        let camera = self.camera.clone();
        let sender = self.sender.clone();
        let frames_sent = self.frames_sent.clone();
        let period = camera.format().frame_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period.max(std::time::Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    changed = cancelled.changed() => {
                        if changed.is_err() || *cancelled.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if sender.receiver_count() == 0 {
                            continue;
                        }
                        if let Some(frame) = camera.latest_frame() {
                            if sender.send(frame).is_ok() {
                                frames_sent.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                }
            }
            debug!(camera_id = %camera.id(), "Broadcast task finished");
        });

        *task = Some(BroadcastTask { cancel, handle });
        info!(camera_id = %self.camera.id(), "📡 Started frame broadcast");
    }

    /// Cancel the sampling task and wait for it to finish
    pub async fn stop(&self) {
        let task = self.task.lock().take();
        let Some(BroadcastTask { cancel, handle }) = task else {
            return;
        };

        let _ = cancel.send(true);
        if let Err(e) = handle.await {
            warn!(camera_id = %self.camera.id(), "Broadcast task ended abnormally: {}", e);
        }
        info!(camera_id = %self.camera.id(), "Stopped frame broadcast");
    }
}

impl Drop for FrameBroadcaster {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            let _ = task.cancel.send(true);
        }
    }
}
