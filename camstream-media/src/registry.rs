//! Camera registry and batched startup
//!
//! The registry is an explicit object handed to whoever needs cameras; there
//! is no process-global instance map. Each configured id maps to exactly one
//! [`CameraDevice`] for the registry's lifetime.

use crate::capture::{CaptureBackend, DeviceProvider};
use crate::device::{CameraConfig, CameraDevice, DeviceState, DEFAULT_CAPTURE_TIMEOUT};
use crate::recording::SinkFactory;
use camstream_core::{CamStreamError, Result};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// How startup initialization is batched and retried
#[derive(Debug, Clone)]
pub struct InitPolicy {
    /// Cameras initialized concurrently per batch
    pub batch_size: usize,
    /// Pause between two batches
    pub batch_pause: Duration,
    /// Attempts per camera before it is marked failed
    pub max_attempts: u32,
    /// Backoff after failed attempt `n` is `backoff_base * 2^n`
    pub backoff_base: Duration,
}

impl Default for InitPolicy {
    fn default() -> Self {
        Self {
            batch_size: 1,
            batch_pause: Duration::from_secs(2),
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl InitPolicy {
    /// Delay after the given failed attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Outcome of [`CameraRegistry::initialize_all`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct StartupReport {
    /// Cameras that came up
    pub active: Vec<String>,
    /// Cameras that failed every attempt
    pub failed: Vec<String>,
    /// Attempts spent per camera
    pub attempts: HashMap<String, u32>,
    /// Wall time of the whole startup
    pub elapsed: Duration,
}

impl StartupReport {
    /// True when every configured camera is active
    pub fn all_active(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Keyed collection of camera instances
pub struct CameraRegistry {
    configs: Vec<CameraConfig>,
    backend: Arc<dyn CaptureBackend>,
    sinks: Arc<dyn SinkFactory>,
    cameras: Mutex<HashMap<String, Arc<CameraDevice>>>,
    constructed: AtomicUsize,
    policy: InitPolicy,
    capture_timeout: Duration,
}

impl std::fmt::Debug for CameraRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraRegistry")
            .field("configured", &self.camera_ids())
            .field("constructed", &self.instances_created())
            .finish()
    }
}

impl CameraRegistry {
    /// Registry over `configs`. No camera is constructed yet.
    pub fn new(
        configs: Vec<CameraConfig>,
        backend: Arc<dyn CaptureBackend>,
        sinks: Arc<dyn SinkFactory>,
    ) -> Self {
        Self {
            configs,
            backend,
            sinks,
            cameras: Mutex::new(HashMap::new()),
            constructed: AtomicUsize::new(0),
            policy: InitPolicy::default(),
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
        }
    }

    /// Registry over the devices a provider reports
    pub fn from_provider(
        provider: &dyn DeviceProvider,
        backend: Arc<dyn CaptureBackend>,
        sinks: Arc<dyn SinkFactory>,
    ) -> Result<Self> {
        let configs = provider
            .list_devices()?
            .into_iter()
            .map(CameraConfig::from)
            .collect();
        Ok(Self::new(configs, backend, sinks))
    }

    /// Single-camera deployment: the camera is constructed and initialized now
    pub fn single_camera(
        config: CameraConfig,
        backend: Arc<dyn CaptureBackend>,
        sinks: Arc<dyn SinkFactory>,
    ) -> Result<Self> {
        let id = config.id.clone();
        let registry = Self::new(vec![config], backend, sinks);
        registry.get(&id)?.initialize()?;
        Ok(registry)
    }

    /// Override the startup policy
    pub fn with_policy(mut self, policy: InitPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Override the `capture_one` timeout of cameras constructed from now on
    pub fn with_capture_timeout(mut self, timeout: Duration) -> Self {
        self.capture_timeout = timeout;
        self
    }

    pub fn policy(&self) -> &InitPolicy {
        &self.policy
    }

    /// Configured camera ids, in configuration order
    pub fn camera_ids(&self) -> Vec<String> {
        self.configs.iter().map(|c| c.id.clone()).collect()
    }

    /// First configured camera
    pub fn default_camera_id(&self) -> Option<&str> {
        self.configs.first().map(|c| c.id.as_str())
    }

    /// Whether `camera_id` is configured
    pub fn contains(&self, camera_id: &str) -> bool {
        self.configs.iter().any(|c| c.id == camera_id)
    }

    /// The instance for `camera_id`, constructing it on first use.
    ///
    /// Concurrent first access constructs exactly one instance. Construction
    /// does not open hardware.
    pub fn get(&self, camera_id: &str) -> Result<Arc<CameraDevice>> {
        let mut cameras = self.cameras.lock();
        if let Some(camera) = cameras.get(camera_id) {
            return Ok(camera.clone());
        }

        let config = self
            .configs
            .iter()
            .find(|c| c.id == camera_id)
            .ok_or_else(|| CamStreamError::CameraNotFound {
                camera_id: camera_id.to_string(),
            })?;

        let camera = Arc::new(
            CameraDevice::new(config.clone(), self.backend.clone(), self.sinks.clone())
                .with_capture_timeout(self.capture_timeout),
        );
        cameras.insert(camera_id.to_string(), camera.clone());
        self.constructed.fetch_add(1, Ordering::SeqCst);
        Ok(camera)
    }

    /// Every configured camera, constructing missing instances
    pub fn get_all(&self) -> HashMap<String, Arc<CameraDevice>> {
        self.configs
            .iter()
            .filter_map(|c| self.get(&c.id).ok().map(|camera| (c.id.clone(), camera)))
            .collect()
    }

    /// Constructed instances in configuration order. Never constructs.
    pub fn constructed(&self) -> Vec<Arc<CameraDevice>> {
        let cameras = self.cameras.lock();
        self.configs
            .iter()
            .filter_map(|c| cameras.get(&c.id).cloned())
            .collect()
    }

    /// Number of instances constructed so far
    pub fn instances_created(&self) -> usize {
        self.constructed.load(Ordering::SeqCst)
    }

    /// Ids of cameras whose capture loop is running
    pub fn active_ids(&self) -> Vec<String> {
        let cameras = self.cameras.lock();
        self.configs
            .iter()
            .filter(|c| cameras.get(&c.id).map(|d| d.is_active()).unwrap_or(false))
            .map(|c| c.id.clone())
            .collect()
    }

    /// Initialize one camera
    pub async fn initialize(&self, camera_id: &str) -> Result<()> {
        self.get(camera_id)?.initialize_async().await
    }

    /// Release one camera
    pub async fn release(&self, camera_id: &str) -> Result<()> {
        let camera = self.cameras.lock().get(camera_id).cloned();
        match camera {
            Some(camera) => camera.release_async().await,
            None if self.contains(camera_id) => Ok(()),
            None => Err(CamStreamError::CameraNotFound {
                camera_id: camera_id.to_string(),
            }),
        }
    }

    /// Release every constructed camera
    pub async fn release_all(&self) {
        let cameras: Vec<_> = self.cameras.lock().values().cloned().collect();
        for camera in cameras {
            if let Err(e) = camera.release_async().await {
                error!(camera_id = %camera.id(), "Failed to release camera: {}", e);
            }
        }
        info!("All cameras released");
    }

    /// Startup initializer.
    ///
    /// Cameras are initialized in batches of `batch_size`, concurrently
    /// within a batch, with `batch_pause` between batches. Each camera gets
    /// `max_attempts` tries with exponential backoff; one that never comes
    /// up is marked failed and startup continues with the others.
    pub async fn initialize_all(&self) -> StartupReport {
        let started = Instant::now();
        let batch_size = self.policy.batch_size.max(1);
        let mut report = StartupReport::default();

        info!(
            cameras = self.configs.len(),
            batch_size, "🚀 Initializing cameras"
        );

        for (batch_index, batch) in self.configs.chunks(batch_size).enumerate() {
            if batch_index > 0 {
                tokio::time::sleep(self.policy.batch_pause).await;
            }

            let results = join_all(
                batch
                    .iter()
                    .map(|config| self.initialize_with_retry(config.id.clone())),
            )
            .await;

            for (camera_id, attempts, outcome) in results {
                report.attempts.insert(camera_id.clone(), attempts);
                match outcome {
                    Ok(()) => report.active.push(camera_id),
                    Err(_) => report.failed.push(camera_id),
                }
            }
        }

        report.elapsed = started.elapsed();
        if report.failed.is_empty() {
            info!(
                active = report.active.len(),
                elapsed_ms = report.elapsed.as_millis() as u64,
                "✅ All cameras initialized"
            );
        } else {
            warn!(
                active = report.active.len(),
                failed = ?report.failed,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Camera startup finished with failures"
            );
        }
        report
    }

    async fn initialize_with_retry(&self, camera_id: String) -> (String, u32, Result<()>) {
        let camera = match self.get(&camera_id) {
            Ok(camera) => camera,
            Err(e) => return (camera_id, 0, Err(e)),
        };

        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=max_attempts {
            match camera.initialize_async().await {
                Ok(()) => return (camera_id, attempt, Ok(())),
                Err(e) => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        camera_id = %camera_id,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Camera initialization attempt failed: {}", e
                    );
                    last_error = Some(e);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        camera.mark_failed();
        error!(camera_id = %camera_id, "Camera failed all {} initialization attempts", max_attempts);
        let error = last_error.unwrap_or_else(|| CamStreamError::Initialization {
            reason: format!("camera {} did not initialize", camera_id),
        });
        (camera_id, max_attempts, Err(error))
    }

    /// Lifecycle state of every constructed camera
    pub fn states(&self) -> HashMap<String, DeviceState> {
        self.cameras
            .lock()
            .iter()
            .map(|(id, camera)| (id.clone(), camera.state()))
            .collect()
    }
}
