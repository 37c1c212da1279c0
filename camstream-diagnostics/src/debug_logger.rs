//! Structured logging setup

use camstream_core::{CamStreamError, Result};
use tracing_subscriber::EnvFilter;

/// Installs the process-wide tracing subscriber
#[derive(Debug, Default)]
pub struct DebugLogger;

impl DebugLogger {
    /// Create new debug logger
    pub fn new() -> Self {
        Self
    }

    /// Initialize logging at `level` (`error`..`trace`, or any filter
    /// directive). `RUST_LOG` wins when set. Calling this again after a
    /// subscriber is installed is a no-op.
    pub fn init_logging(level: &str) -> Result<()> {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(level).map_err(|e| CamStreamError::InvalidConfiguration {
                message: format!("invalid log level '{}': {}", level, e),
            })?,
        };

        // Err only means a subscriber already exists.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .try_init();
        Ok(())
    }

    /// Whether `level` is a valid filter directive
    pub fn is_valid_level(level: &str) -> bool {
        EnvFilter::try_new(level).is_ok()
    }
}
