//! # CamStream - Multi-camera capture and real-time streaming
//!
//! CamStream turns blocking camera hardware into always-fresh frame sources
//! shared by photo capture, recording, broadcast clients and per-viewer
//! real-time sessions.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use camstream::{CamStream, CamStreamConfig};
//! # use std::sync::Arc;
//! # async fn example(transport: Arc<dyn camstream::RtcTransport>) -> camstream::Result<()> {
//! let mut config = CamStreamConfig::default();
//! config.dev_mode = true;
//!
//! let streamer = CamStream::builder()
//!     .config(config)
//!     .transport(transport)
//!     .build()?;
//!
//! let report = streamer.start().await;
//! println!("active cameras: {:?}", report.active);
//!
//! let photo = streamer.capture_photo("camera1").await?;
//! println!("captured {}x{}", photo.width, photo.height);
//!
//! streamer.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;

// Re-export core types for easy access
pub use camstream_core::{
    CamStreamError, ErrorCategory, PixelFormat, Resolution, Result, VideoFrame,
};
pub use camstream_diagnostics::{DebugLogger, StatsReporter, SystemSnapshot};
pub use camstream_media::{
    CameraConfig, CameraDevice, CameraRegistry, CameraStats, CaptureBackend, DeviceDescriptor,
    DeviceProvider, DeviceState, FrameBroadcaster, SinkFactory, StartupReport, SyntheticBackend,
    SyntheticDeviceProvider, Y4mSinkFactory,
};
pub use camstream_signaling::{
    CandidateOutcome, IceCandidateInit, IceServer, RtcTransport, SessionAnswer,
    SessionDescription, SessionStatus, StreamSessionManager,
};

pub use config::{CamStreamConfig, InitConfig, StreamingConfig};

use camstream_signaling::HealthMonitor;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Builder for [`CamStream`]
#[derive(Default)]
pub struct CamStreamBuilder {
    config: CamStreamConfig,
    backend: Option<Arc<dyn CaptureBackend>>,
    provider: Option<Arc<dyn DeviceProvider>>,
    sinks: Option<Arc<dyn SinkFactory>>,
    transport: Option<Arc<dyn RtcTransport>>,
}

impl CamStreamBuilder {
    /// Use this configuration
    pub fn config(mut self, config: CamStreamConfig) -> Self {
        self.config = config;
        self
    }

    /// Capture backend opening real devices
    pub fn backend(mut self, backend: Arc<dyn CaptureBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Device enumeration, consulted when the config lists no cameras
    pub fn device_provider(mut self, provider: Arc<dyn DeviceProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Encode sink factory for recordings (y4m by default)
    pub fn sink_factory(mut self, sinks: Arc<dyn SinkFactory>) -> Self {
        self.sinks = Some(sinks);
        self
    }

    /// Real-time transport used for viewer sessions
    pub fn transport(mut self, transport: Arc<dyn RtcTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Validate the configuration and wire everything together.
    ///
    /// Hardware is not touched; call [`CamStream::start`] for that.
    pub fn build(self) -> Result<CamStream> {
        let CamStreamBuilder {
            config,
            backend,
            provider,
            sinks,
            transport,
        } = self;

        config.validate()?;
        DebugLogger::init_logging(&config.log_level)?;

        let transport = transport.ok_or_else(|| CamStreamError::Initialization {
            reason: "no real-time transport configured".to_string(),
        })?;

        let mut available = config.cameras.clone();
        if available.is_empty() {
            if let Some(provider) = &provider {
                available = provider
                    .list_devices()?
                    .into_iter()
                    .map(CameraConfig::from)
                    .collect();
            }
        }

        let mut backend = backend;
        if available.is_empty() && config.dev_mode {
            warn!("No cameras found, using synthetic camera (development mode)");
            available.push(SyntheticDeviceProvider::descriptor().into());
            backend = Some(Arc::new(SyntheticBackend::new()));
        }

        let backend = match backend {
            Some(backend) => backend,
            None if config.dev_mode => Arc::new(SyntheticBackend::new()),
            None => {
                return Err(CamStreamError::Initialization {
                    reason: "no capture backend configured".to_string(),
                })
            }
        };

        let cameras = config.selected_cameras(available);
        if cameras.is_empty() {
            return Err(CamStreamError::InvalidConfiguration {
                message: "no cameras configured or detected".to_string(),
            });
        }

        let sinks = sinks.unwrap_or_else(|| Arc::new(Y4mSinkFactory::new()));
        let registry = Arc::new(
            CameraRegistry::new(cameras, backend, sinks)
                .with_policy(config.init.policy())
                .with_capture_timeout(config.capture_timeout()),
        );
        let sessions = StreamSessionManager::new(
            transport,
            registry.clone(),
            config.streaming.manager_config(),
        );

        info!(cameras = ?registry.camera_ids(), "CamStream configured");
        Ok(CamStream {
            inner: Arc::new(CamStreamInner {
                config,
                registry,
                sessions,
                broadcasters: Mutex::new(HashMap::new()),
                background: tokio::sync::Mutex::new(Background::default()),
            }),
        })
    }
}

#[derive(Default)]
struct Background {
    health: Option<HealthMonitor>,
    reporter: Option<StatsReporter>,
}

struct CamStreamInner {
    config: CamStreamConfig,
    registry: Arc<CameraRegistry>,
    sessions: StreamSessionManager,
    broadcasters: Mutex<HashMap<String, Arc<FrameBroadcaster>>>,
    background: tokio::sync::Mutex<Background>,
}

/// Main entry point: cameras plus viewer sessions
#[derive(Clone)]
pub struct CamStream {
    inner: Arc<CamStreamInner>,
}

impl std::fmt::Debug for CamStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CamStream")
            .field("registry", &self.inner.registry)
            .field("sessions", &self.inner.sessions)
            .finish()
    }
}

impl CamStream {
    /// Start building an instance
    pub fn builder() -> CamStreamBuilder {
        CamStreamBuilder::default()
    }

    /// Active configuration
    pub fn config(&self) -> &CamStreamConfig {
        &self.inner.config
    }

    /// Camera registry
    pub fn registry(&self) -> &Arc<CameraRegistry> {
        &self.inner.registry
    }

    /// Viewer session manager
    pub fn sessions(&self) -> &StreamSessionManager {
        &self.inner.sessions
    }

    /// Initialize every camera and start background monitoring
    pub async fn start(&self) -> StartupReport {
        let report = self.inner.registry.initialize_all().await;

        let mut background = self.inner.background.lock().await;
        if background.health.is_none() {
            background.health = Some(self.inner.sessions.spawn_health_monitor());
        }
        if background.reporter.is_none() && self.inner.config.stats_interval_secs > 0 {
            background.reporter = Some(StatsReporter::spawn(
                self.inner.registry.clone(),
                Some(self.inner.sessions.clone()),
                Duration::from_secs(self.inner.config.stats_interval_secs),
            ));
        }

        info!(
            active = report.active.len(),
            failed = report.failed.len(),
            "🚀 CamStream started"
        );
        report
    }

    /// Wait for the next frame of `camera_id`
    pub async fn capture_photo(&self, camera_id: &str) -> Result<VideoFrame> {
        self.inner.registry.get(camera_id)?.capture_one().await
    }

    /// Start recording `camera_id` into the media directory; returns the file path
    pub async fn start_recording(&self, camera_id: &str) -> Result<PathBuf> {
        let camera = self.inner.registry.get(camera_id)?;
        if let Some(path) = camera.recorder().current_path() {
            return Ok(path);
        }
        let path = self.recording_path(camera_id);
        camera.start_recording(path.clone()).await?;
        Ok(path)
    }

    /// Stop recording `camera_id`
    pub async fn stop_recording(&self, camera_id: &str) -> Result<Option<PathBuf>> {
        self.inner.registry.get(camera_id)?.stop_recording().await
    }

    fn recording_path(&self, camera_id: &str) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        self.inner
            .config
            .media_dir
            .join("videos")
            .join(format!("{}_{}.y4m", camera_id, stamp))
    }

    /// Broadcaster of `camera_id`, created and started on first use
    pub fn broadcaster(&self, camera_id: &str) -> Result<Arc<FrameBroadcaster>> {
        let camera = self.inner.registry.get(camera_id)?;
        let broadcaster = self
            .inner
            .broadcasters
            .lock()
            .entry(camera_id.to_string())
            .or_insert_with(|| {
                Arc::new(FrameBroadcaster::new(
                    camera,
                    self.inner.config.max_broadcast_clients,
                ))
            })
            .clone();
        broadcaster.start();
        Ok(broadcaster)
    }

    /// Current cameras and sessions
    pub fn snapshot(&self) -> SystemSnapshot {
        SystemSnapshot::collect(&self.inner.registry, Some(&self.inner.sessions))
    }

    /// Stop background tasks, close sessions and release every camera
    pub async fn shutdown(&self) {
        let background = std::mem::take(&mut *self.inner.background.lock().await);
        if let Some(health) = background.health {
            health.stop().await;
        }
        if let Some(reporter) = background.reporter {
            reporter.stop().await;
        }

        let broadcasters: Vec<_> = self.inner.broadcasters.lock().drain().map(|(_, b)| b).collect();
        futures::future::join_all(broadcasters.iter().map(|b| b.stop())).await;

        self.inner.sessions.close_all().await;
        self.inner.registry.release_all().await;
        info!("CamStream shut down");
    }
}
