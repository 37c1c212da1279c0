//! Streaming session manager
//!
//! Owns one peer connection and one [`TrackAdapter`] per viewer session.
//! Creation and teardown of the same session id are serialized through a
//! per-id async lock; the session map itself is only locked for insert and
//! remove, never across transport calls.

use crate::protocol::{
    CandidateOutcome, IceCandidateInit, IceServer, SessionAnswer, SessionDescription,
    SessionStatus,
};
use crate::track::{CameraFeed, TrackAdapter, TrackAdapterConfig};
use crate::transport::{
    ConnectionState, PeerConnection, RtcTransport, StateChange, StateChangeHandler,
};
use camstream_core::{CamStreamError, Result};
use camstream_media::{CameraDevice, CameraRegistry};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default minimum time between two health sweeps
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Session manager configuration
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// ICE servers handed to every new peer connection
    pub ice_servers: Vec<IceServer>,
    /// Minimum time between two health sweeps
    pub health_check_interval: Duration,
    /// Tuning of the per-session tracks
    pub track: TrackAdapterConfig,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer::default_stun()],
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            track: TrackAdapterConfig::default(),
        }
    }
}

struct StreamSession {
    id: String,
    generation: u64,
    camera: Arc<CameraDevice>,
    peer: Arc<dyn PeerConnection>,
    track: Arc<TrackAdapter>,
    created_at: DateTime<Utc>,
}

impl StreamSession {
    async fn teardown(&self) {
        self.track.stop();
        self.camera.unregister_client(&self.id);
        if let Err(e) = self.peer.close().await {
            warn!(session_id = %self.id, "Error closing peer connection: {}", e);
        }
    }
}

struct Inner {
    transport: Arc<dyn RtcTransport>,
    registry: Arc<CameraRegistry>,
    config: SessionManagerConfig,
    sessions: Mutex<HashMap<String, Arc<StreamSession>>>,
    /// Serializes create/close per session id
    id_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    generations: AtomicU64,
    last_sweep: Mutex<Option<Instant>>,
    sweeps: AtomicU64,
}

impl Inner {
    fn id_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.id_locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry once nobody else holds or waits on it
    fn release_id_lock(&self, session_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        self.id_locks
            .remove_if(session_id, |_, entry| {
                Arc::ptr_eq(entry, &lock) && Arc::strong_count(entry) == 2
            });
    }

    /// Remove and tear down a session. Caller holds the id lock.
    async fn close_locked(&self, session_id: &str, generation: Option<u64>) -> bool {
        let session = {
            let mut sessions = self.sessions.lock();
            match sessions.get(session_id) {
                Some(s) if generation.map(|g| g == s.generation).unwrap_or(true) => {
                    sessions.remove(session_id)
                }
                _ => None,
            }
        };

        match session {
            Some(session) => {
                session.teardown().await;
                info!(session_id = %session_id, camera_id = %session.camera.id(), "Session closed");
                true
            }
            None => false,
        }
    }

    async fn close(&self, session_id: &str, generation: Option<u64>) -> bool {
        let lock = self.id_lock(session_id);
        let closed = {
            let _guard = lock.lock().await;
            self.close_locked(session_id, generation).await
        };
        self.release_id_lock(session_id, lock);
        closed
    }

    fn session(&self, session_id: &str) -> Option<Arc<StreamSession>> {
        self.sessions.lock().get(session_id).cloned()
    }
}

/// One real-time session per connected viewer
#[derive(Clone)]
pub struct StreamSessionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for StreamSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSessionManager")
            .field("sessions", &self.session_count())
            .finish()
    }
}

impl StreamSessionManager {
    /// Create a manager driving `transport` over the cameras of `registry`
    pub fn new(
        transport: Arc<dyn RtcTransport>,
        registry: Arc<CameraRegistry>,
        config: SessionManagerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                registry,
                config,
                sessions: Mutex::new(HashMap::new()),
                id_locks: DashMap::new(),
                generations: AtomicU64::new(0),
                last_sweep: Mutex::new(None),
                sweeps: AtomicU64::new(0),
            }),
        }
    }

    /// Fresh random session id
    pub fn new_session_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    /// Ids of live sessions
    pub fn session_ids(&self) -> Vec<String> {
        self.inner.sessions.lock().keys().cloned().collect()
    }

    /// Track of a live session
    pub fn track(&self, session_id: &str) -> Option<Arc<TrackAdapter>> {
        self.inner.session(session_id).map(|s| s.track.clone())
    }

    /// Answer an offer for the default camera
    pub async fn process_offer(
        &self,
        session_id: &str,
        offer: SessionDescription,
    ) -> Result<SessionAnswer> {
        let camera_id = self
            .inner
            .registry
            .default_camera_id()
            .map(str::to_string)
            .ok_or_else(|| CamStreamError::CameraNotFound {
                camera_id: "<default>".to_string(),
            })?;
        self.process_offer_for(session_id, &camera_id, offer).await
    }

    /// Answer an offer streaming `camera_id`.
    ///
    /// An existing session with the same id is closed first. If negotiation
    /// fails the partial session is torn down before the error is returned.
    pub async fn process_offer_for(
        &self,
        session_id: &str,
        camera_id: &str,
        offer: SessionDescription,
    ) -> Result<SessionAnswer> {
        let lock = self.inner.id_lock(session_id);
        let result = {
            let _guard = lock.lock().await;
            if self.inner.close_locked(session_id, None).await {
                info!(session_id = %session_id, "Replaced existing session");
            }
            self.negotiate(session_id, camera_id, offer).await
        };
        self.inner.release_id_lock(session_id, lock);
        result
    }

    async fn negotiate(
        &self,
        session_id: &str,
        camera_id: &str,
        offer: SessionDescription,
    ) -> Result<SessionAnswer> {
        let inner = &self.inner;
        let camera = inner.registry.get(camera_id)?;
        if !camera.is_active() {
            camera.initialize_async().await?;
        }

        let negotiation_failed = |reason: String| CamStreamError::NegotiationFailed {
            session_id: session_id.to_string(),
            reason,
        };

        let peer = inner
            .transport
            .create_session(&inner.config.ice_servers)
            .await
            .map_err(|e| negotiation_failed(e.to_string()))?;

        let feed: Arc<dyn CameraFeed> = camera.clone();
        let track = Arc::new(TrackAdapter::new(feed, inner.config.track.clone()));
        let session = Arc::new(StreamSession {
            id: session_id.to_string(),
            generation: inner.generations.fetch_add(1, Ordering::SeqCst) + 1,
            camera: camera.clone(),
            peer: peer.clone(),
            track: track.clone(),
            created_at: Utc::now(),
        });

        inner
            .sessions
            .lock()
            .insert(session_id.to_string(), session.clone());
        camera.register_client(session_id);

        let exchange = async {
            peer.on_state_change(state_handler(
                Arc::downgrade(inner),
                session_id.to_string(),
                session.generation,
                track.clone(),
            ));
            peer.add_track(track.clone())?;
            peer.set_remote_description(offer).await?;
            peer.create_answer().await
        };

        match exchange.await {
            Ok(answer) => {
                info!(
                    session_id = %session_id,
                    camera_id = %camera_id,
                    "🤝 Session negotiated"
                );
                Ok(SessionAnswer {
                    sdp: answer.sdp,
                    sdp_type: answer.sdp_type,
                    session_id: session_id.to_string(),
                })
            }
            Err(e) => {
                error!(session_id = %session_id, "Negotiation failed: {}", e);
                inner.close_locked(session_id, Some(session.generation)).await;
                Err(negotiation_failed(e.to_string()))
            }
        }
    }

    /// Hand a remote candidate to the session's transport.
    ///
    /// Never fails: unknown sessions, empty candidates and transport
    /// rejections come back as a soft failure.
    pub async fn process_ice_candidate(
        &self,
        session_id: &str,
        candidate: IceCandidateInit,
    ) -> CandidateOutcome {
        let Some(session) = self.inner.session(session_id) else {
            warn!(session_id = %session_id, "ICE candidate for unknown session");
            return CandidateOutcome::rejected("session not found");
        };

        if candidate.candidate.trim().is_empty() {
            debug!(session_id = %session_id, "Ignoring empty ICE candidate");
            return CandidateOutcome::rejected("empty candidate");
        }

        match session.peer.add_ice_candidate(candidate).await {
            Ok(()) => CandidateOutcome::accepted(),
            Err(e) => {
                let error = CamStreamError::CandidateRejected {
                    session_id: session_id.to_string(),
                    reason: e.to_string(),
                };
                warn!(session_id = %session_id, "{}", error);
                CandidateOutcome::rejected(error.to_string())
            }
        }
    }

    /// Status of a session; `exists == false` for unknown ids
    pub fn get_status(&self, session_id: &str) -> SessionStatus {
        let Some(session) = self.inner.session(session_id) else {
            return SessionStatus::missing();
        };

        let snapshot = session.peer.snapshot();
        SessionStatus {
            exists: true,
            connected: snapshot.connection == ConnectionState::Connected,
            camera_id: Some(session.camera.id().to_string()),
            connection_state: Some(snapshot.connection.to_string()),
            ice_connection_state: Some(snapshot.ice_connection.to_string()),
            ice_gathering_state: Some(snapshot.ice_gathering.to_string()),
            signaling_state: Some(snapshot.signaling.to_string()),
            stream_active: session.track.is_active(),
            created_at: Some(session.created_at),
        }
    }

    /// Close a session. Unknown or already closed ids are a no-op.
    pub async fn close(&self, session_id: &str) {
        if !self.inner.close(session_id, None).await {
            debug!(session_id = %session_id, "Close for unknown session ignored");
        }
    }

    /// Close every session
    pub async fn close_all(&self) {
        let ids = self.session_ids();
        let count = ids.len();
        join_all(ids.iter().map(|id| self.inner.close(id, None))).await;
        if count > 0 {
            info!(sessions = count, "Closed all sessions");
        }
    }

    /// Close sessions whose transport reached a terminal state.
    ///
    /// Runs at most once per health check interval; returns the number of
    /// sessions closed (zero when skipped).
    pub async fn health_sweep(&self) -> usize {
        {
            let mut last = self.inner.last_sweep.lock();
            let now = Instant::now();
            if let Some(previous) = *last {
                if now.duration_since(previous) < self.inner.config.health_check_interval {
                    return 0;
                }
            }
            *last = Some(now);
        }
        self.sweep().await
    }

    /// Number of health sweeps executed so far
    pub fn health_sweeps(&self) -> u64 {
        self.inner.sweeps.load(Ordering::Relaxed)
    }

    /// Unconditional sweep. The monitor's ticker already paces it.
    async fn sweep(&self) -> usize {
        *self.inner.last_sweep.lock() = Some(Instant::now());
        self.inner.sweeps.fetch_add(1, Ordering::Relaxed);

        let sessions: Vec<_> = self.inner.sessions.lock().values().cloned().collect();
        let stale: Vec<(String, u64)> = sessions
            .iter()
            .filter(|s| s.peer.snapshot().is_terminal())
            .map(|s| (s.id.clone(), s.generation))
            .collect();

        let mut closed = 0;
        for (id, generation) in stale {
            if self.inner.close(&id, Some(generation)).await {
                warn!(session_id = %id, "Health sweep closed session in terminal state");
                closed += 1;
            }
        }
        if closed > 0 {
            info!(closed, remaining = self.session_count(), "Health sweep finished");
        }
        closed
    }

    /// Sweep on every tick of the health check interval in the background.
    ///
    /// The monitor bypasses the rate limit of [`StreamSessionManager::health_sweep`].
    pub fn spawn_health_monitor(&self) -> HealthMonitor {
        let manager = self.clone();
        let period = self.inner.config.health_check_interval;
        let (cancel, mut cancelled) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period.max(Duration::from_millis(10)));
            // First tick fires immediately; nothing to sweep at startup.
            ticker.tick().await;
            loop {
                tokio::select! {
                    changed = cancelled.changed() => {
                        if changed.is_err() || *cancelled.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        manager.sweep().await;
                    }
                }
            }
            debug!("Session health monitor stopped");
        });

        info!(interval_secs = period.as_secs(), "Started session health monitor");
        HealthMonitor { cancel, handle }
    }
}

/// Background health sweep task
#[derive(Debug)]
pub struct HealthMonitor {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl HealthMonitor {
    /// Cancel the task and wait for it to exit
    pub async fn stop(self) {
        let _ = self.cancel.send(true);
        if let Err(e) = self.handle.await {
            warn!("Health monitor ended abnormally: {}", e);
        }
    }
}

fn state_handler(
    inner: Weak<Inner>,
    session_id: String,
    generation: u64,
    track: Arc<TrackAdapter>,
) -> StateChangeHandler {
    let runtime = tokio::runtime::Handle::current();
    Box::new(move |change| {
        let (name, connected, disconnected, terminal) = match change {
            StateChange::Connection(state) => (
                format!("connection {}", state),
                state == ConnectionState::Connected,
                state == ConnectionState::Disconnected,
                state.is_terminal(),
            ),
            StateChange::IceConnection(state) => (
                format!("ice {}", state),
                state.is_connected(),
                state == crate::transport::IceConnectionState::Disconnected,
                state.is_terminal(),
            ),
        };
        debug!(session_id = %session_id, state = %name, "Transport state change");

        if connected {
            track.restart();
            info!(session_id = %session_id, "✅ Viewer connected");
        } else if disconnected {
            warn!(session_id = %session_id, "Viewer disconnected, waiting for recovery");
        } else if terminal {
            info!(session_id = %session_id, state = %name, "Session reached terminal state");
            if let Some(inner) = inner.upgrade() {
                let session_id = session_id.clone();
                runtime.spawn(async move {
                    inner.close(&session_id, Some(generation)).await;
                });
            }
        }
    })
}
