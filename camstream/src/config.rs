//! Configuration types and defaults

use camstream_core::{CamStreamError, Result};
use camstream_diagnostics::DebugLogger;
use camstream_media::{CameraConfig, InitPolicy};
use camstream_signaling::{IceServer, SessionManagerConfig, TrackAdapterConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Startup initialization policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitConfig {
    /// Cameras initialized concurrently
    pub batch_size: usize,
    /// Pause between batches
    pub batch_pause_ms: u64,
    /// Attempts per camera
    pub max_attempts: u32,
    /// Backoff after failed attempt `n` is `backoff_base_ms * 2^n`
    pub backoff_base_ms: u64,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            batch_pause_ms: 2_000,
            max_attempts: 3,
            backoff_base_ms: 1_000,
        }
    }
}

impl InitConfig {
    /// Registry policy for this configuration
    pub fn policy(&self) -> InitPolicy {
        InitPolicy {
            batch_size: self.batch_size,
            batch_pause: Duration::from_millis(self.batch_pause_ms),
            max_attempts: self.max_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
        }
    }
}

/// Streaming session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// ICE servers handed to every peer connection
    pub ice_servers: Vec<IceServer>,
    /// Minimum time between health sweeps
    pub health_check_interval_secs: u64,
    /// Frames older than this are treated as a failed read by tracks
    pub frame_stale_after_ms: u64,
    /// Consecutive failed reads before a track goes black
    pub error_threshold: u32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer::default_stun()],
            health_check_interval_secs: 30,
            frame_stale_after_ms: 500,
            error_threshold: 10,
        }
    }
}

impl StreamingConfig {
    /// Session manager configuration for these settings
    pub fn manager_config(&self) -> SessionManagerConfig {
        SessionManagerConfig {
            ice_servers: self.ice_servers.clone(),
            health_check_interval: Duration::from_secs(self.health_check_interval_secs),
            track: TrackAdapterConfig {
                error_threshold: self.error_threshold,
                stale_after: Duration::from_millis(self.frame_stale_after_ms),
            },
        }
    }
}

/// Global CamStream configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CamStreamConfig {
    /// Configured cameras; empty means "ask the device provider"
    pub cameras: Vec<CameraConfig>,
    /// Only these camera ids are used, when set
    pub enabled_cameras: Option<Vec<String>>,
    /// Camera used for offers that do not name one
    pub default_camera: Option<String>,
    /// Startup initialization
    pub init: InitConfig,
    /// Streaming sessions
    pub streaming: StreamingConfig,
    /// How long a photo capture waits for a frame
    pub capture_timeout_ms: u64,
    /// Subscribers allowed per camera broadcast
    pub max_broadcast_clients: usize,
    /// Root directory for recordings
    pub media_dir: PathBuf,
    /// Fall back to a synthetic camera when no device is found
    pub dev_mode: bool,
    /// Log filter, e.g. `info` or `camstream_media=debug`
    pub log_level: String,
    /// Period of the stats reporter; 0 disables it
    pub stats_interval_secs: u64,
}

impl Default for CamStreamConfig {
    fn default() -> Self {
        Self {
            cameras: Vec::new(),
            enabled_cameras: None,
            default_camera: None,
            init: InitConfig::default(),
            streaming: StreamingConfig::default(),
            capture_timeout_ms: 1_000,
            max_broadcast_clients: 5,
            media_dir: PathBuf::from("media"),
            dev_mode: false,
            log_level: "info".to_string(),
            stats_interval_secs: 0,
        }
    }
}

impl CamStreamConfig {
    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`.
    ///
    /// Recognized keys: `ENABLED_CAMERAS` (comma separated ids),
    /// `CAMERA_INIT_BATCH_SIZE`, `CAMSTREAM_DEV` and `LOG_LEVEL`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(ids) = lookup("ENABLED_CAMERAS") {
            let ids: Vec<String> = ids
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect();
            if !ids.is_empty() {
                self.enabled_cameras = Some(ids);
            }
        }

        if let Some(size) = lookup("CAMERA_INIT_BATCH_SIZE") {
            self.init.batch_size =
                size.trim()
                    .parse()
                    .map_err(|_| CamStreamError::InvalidConfiguration {
                        message: format!("CAMERA_INIT_BATCH_SIZE must be a number, got '{}'", size),
                    })?;
        }

        if let Some(dev) = lookup("CAMSTREAM_DEV") {
            self.dev_mode = matches!(
                dev.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            self.log_level = level.trim().to_string();
        }

        Ok(())
    }

    /// Check the configuration for contradictions
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(CamStreamError::InvalidConfiguration { message });

        let mut ids = HashSet::new();
        for camera in &self.cameras {
            if camera.id.trim().is_empty() {
                return invalid("camera id must not be empty".to_string());
            }
            if !ids.insert(camera.id.as_str()) {
                return invalid(format!("duplicate camera id '{}'", camera.id));
            }
            if camera.width == 0 || camera.height == 0 || camera.fps <= 0.0 {
                return invalid(format!(
                    "camera '{}' has invalid format {}x{}@{}",
                    camera.id, camera.width, camera.height, camera.fps
                ));
            }
        }

        if !self.cameras.is_empty() {
            if let Some(default) = &self.default_camera {
                if !ids.contains(default.as_str()) {
                    return invalid(format!("default camera '{}' is not configured", default));
                }
            }
            for id in self.enabled_cameras.iter().flatten() {
                if !ids.contains(id.as_str()) {
                    return invalid(format!("enabled camera '{}' is not configured", id));
                }
            }
        }

        if self.init.batch_size == 0 {
            return invalid("init.batch_size must be at least 1".to_string());
        }
        if self.init.max_attempts == 0 {
            return invalid("init.max_attempts must be at least 1".to_string());
        }
        if self.max_broadcast_clients == 0 {
            return invalid("max_broadcast_clients must be at least 1".to_string());
        }
        if self.capture_timeout_ms == 0 {
            return invalid("capture_timeout_ms must be positive".to_string());
        }
        if self.streaming.ice_servers.iter().any(|s| s.urls.is_empty()) {
            return invalid("every ICE server needs at least one URL".to_string());
        }
        if !DebugLogger::is_valid_level(&self.log_level) {
            return invalid(format!("invalid log level '{}'", self.log_level));
        }

        Ok(())
    }

    /// Cameras after the enabled filter, default camera first
    pub fn selected_cameras(&self, available: Vec<CameraConfig>) -> Vec<CameraConfig> {
        let mut cameras: Vec<CameraConfig> = match &self.enabled_cameras {
            Some(enabled) => available
                .into_iter()
                .filter(|c| enabled.contains(&c.id))
                .collect(),
            None => available,
        };

        if let Some(default) = &self.default_camera {
            if let Some(position) = cameras.iter().position(|c| &c.id == default) {
                let camera = cameras.remove(position);
                cameras.insert(0, camera);
            }
        }
        cameras
    }

    /// `capture_timeout_ms` as a duration
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = CamStreamConfig::default();
        assert_eq!(config.init.batch_size, 1);
        assert_eq!(config.init.max_attempts, 3);
        assert_eq!(config.init.policy().backoff(1), Duration::from_secs(2));
        assert_eq!(config.streaming.health_check_interval_secs, 30);
        assert_eq!(config.streaming.error_threshold, 10);
        assert_eq!(
            config.streaming.ice_servers[0].urls[0],
            "stun:stun.l.google.com:19302"
        );
        assert_eq!(config.max_broadcast_clients, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config = CamStreamConfig::from_json_str(
            r#"{
                "cameras": [{"id": "camera1", "index": 0}, {"id": "camera2", "index": 2, "fps": 15.0}],
                "init": {"batch_size": 2}
            }"#,
        )
        .unwrap();

        assert_eq!(config.cameras.len(), 2);
        assert_eq!(config.cameras[0].width, 640);
        assert_eq!(config.cameras[1].fps, 15.0);
        assert_eq!(config.init.batch_size, 2);
        assert_eq!(config.init.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_malformed_json() {
        let err = CamStreamConfig::from_json_str("{ not json").unwrap_err();
        assert_eq!(err.category(), camstream_core::ErrorCategory::Configuration);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("ENABLED_CAMERAS", "camera2, camera3"),
            ("CAMERA_INIT_BATCH_SIZE", "4"),
            ("CAMSTREAM_DEV", "true"),
            ("LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        let mut config = CamStreamConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(
            config.enabled_cameras,
            Some(vec!["camera2".to_string(), "camera3".to_string()])
        );
        assert_eq!(config.init.batch_size, 4);
        assert!(config.dev_mode);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_bad_batch_size_override() {
        let mut config = CamStreamConfig::default();
        let result = config.apply_overrides(|key| {
            (key == "CAMERA_INIT_BATCH_SIZE").then(|| "many".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_failures() {
        let mut config = CamStreamConfig {
            cameras: vec![CameraConfig::new("camera1", 0), CameraConfig::new("camera1", 1)],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.cameras.pop();
        config.default_camera = Some("camera9".to_string());
        assert!(config.validate().is_err());

        config.default_camera = None;
        config.init.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_selected_cameras_filters_and_orders() {
        let config = CamStreamConfig {
            enabled_cameras: Some(vec!["camera1".to_string(), "camera3".to_string()]),
            default_camera: Some("camera3".to_string()),
            ..Default::default()
        };
        let selected = config.selected_cameras(vec![
            CameraConfig::new("camera1", 0),
            CameraConfig::new("camera2", 1),
            CameraConfig::new("camera3", 2),
        ]);
        let ids: Vec<_> = selected.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["camera3", "camera1"]);
    }
}
