//! Periodic system snapshot reporting

use camstream_core::Result;
use camstream_media::{CameraRegistry, CameraStats};
use camstream_signaling::StreamSessionManager;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Point-in-time view of cameras and sessions
#[derive(Debug, Clone, Serialize)]
pub struct SystemSnapshot {
    /// When the snapshot was taken
    pub taken_at: DateTime<Utc>,
    /// Stats of every constructed camera
    pub cameras: Vec<CameraStats>,
    /// Cameras with a running capture loop
    pub active_cameras: usize,
    /// Cameras currently recording
    pub recording_cameras: usize,
    /// Live streaming sessions
    pub sessions: usize,
}

impl SystemSnapshot {
    /// Collect a snapshot. Cameras that were never referenced are not
    /// constructed by this call.
    pub fn collect(registry: &CameraRegistry, sessions: Option<&StreamSessionManager>) -> Self {
        let cameras: Vec<CameraStats> = registry
            .constructed()
            .iter()
            .map(|camera| camera.stats())
            .collect();

        Self {
            taken_at: Utc::now(),
            active_cameras: cameras.iter().filter(|c| c.active).count(),
            recording_cameras: cameras.iter().filter(|c| c.recording).count(),
            sessions: sessions.map(|s| s.session_count()).unwrap_or(0),
            cameras,
        }
    }

    /// Pretty JSON rendering
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Total capture errors across cameras
    pub fn total_errors(&self) -> u64 {
        self.cameras.iter().map(|c| c.errors).sum()
    }
}

/// Background task logging a [`SystemSnapshot`] at a fixed interval
#[derive(Debug)]
pub struct StatsReporter {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
    latest: watch::Receiver<Option<SystemSnapshot>>,
}

impl StatsReporter {
    /// Start reporting every `period`
    pub fn spawn(
        registry: Arc<CameraRegistry>,
        sessions: Option<StreamSessionManager>,
        period: Duration,
    ) -> Self {
        let (cancel, mut cancelled) = watch::channel(false);
        let (publish, latest) = watch::channel(None);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period.max(Duration::from_millis(10)));
            loop {
                tokio::select! {
                    changed = cancelled.changed() => {
                        if changed.is_err() || *cancelled.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let snapshot = SystemSnapshot::collect(&registry, sessions.as_ref());
                        info!(
                            cameras = snapshot.cameras.len(),
                            active = snapshot.active_cameras,
                            recording = snapshot.recording_cameras,
                            sessions = snapshot.sessions,
                            errors = snapshot.total_errors(),
                            "📊 System stats"
                        );
                        for camera in &snapshot.cameras {
                            debug!(
                                camera_id = %camera.camera_id,
                                fps = camera.fps_actual,
                                frames = camera.frames_captured,
                                clients = camera.clients,
                                "Camera stats"
                            );
                        }
                        let _ = publish.send(Some(snapshot));
                    }
                }
            }
        });

        Self {
            cancel,
            handle,
            latest,
        }
    }

    /// Most recent snapshot, if one was taken
    pub fn latest(&self) -> Option<SystemSnapshot> {
        self.latest.borrow().clone()
    }

    /// Cancel the task and wait for it to exit
    pub async fn stop(self) {
        let _ = self.cancel.send(true);
        if let Err(e) = self.handle.await {
            warn!("Stats reporter ended abnormally: {}", e);
        }
    }
}
