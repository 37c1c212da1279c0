//! Error types for CamStream
//!
//! Every fallible operation in the workspace returns [`CamStreamError`].
//! Callers branch on the variant (or on [`ErrorCategory`]) instead of
//! matching on message text.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for CamStream operations
#[derive(Error, Debug)]
pub enum CamStreamError {
    /// The capture device could not be opened
    #[error("Failed to open camera {camera_id} (index {index}): {reason}")]
    DeviceOpenFailed {
        /// Camera identifier
        camera_id: String,
        /// Hardware index that was opened
        index: u32,
        /// Failure reason
        reason: String,
    },

    /// No frame was published within the allowed time
    #[error("Timed out waiting for a frame from camera {camera_id} after {timeout:?}")]
    DeviceReadTimeout {
        /// Camera identifier
        camera_id: String,
        /// Time waited
        timeout: Duration,
    },

    /// Reading a frame from the device failed
    #[error("Failed to read frame from camera {camera_id}: {reason}")]
    DeviceReadFailed {
        /// Camera identifier
        camera_id: String,
        /// Failure reason
        reason: String,
    },

    /// Offer/answer negotiation failed
    #[error("Negotiation failed for session {session_id}: {reason}")]
    NegotiationFailed {
        /// Session identifier
        session_id: String,
        /// Failure reason
        reason: String,
    },

    /// No session with this id exists
    #[error("Unknown session: {session_id}")]
    UnknownSession {
        /// Session identifier
        session_id: String,
    },

    /// The transport refused an ICE candidate
    #[error("ICE candidate rejected for session {session_id}: {reason}")]
    CandidateRejected {
        /// Session identifier
        session_id: String,
        /// Failure reason
        reason: String,
    },

    /// The encode sink could not be opened
    #[error("Failed to open encode sink at {path:?}: {reason}")]
    SinkOpenFailed {
        /// Output path
        path: PathBuf,
        /// Failure reason
        reason: String,
    },

    /// Writing a frame to the encode sink failed
    #[error("Failed to write frame to {path:?}: {reason}")]
    SinkWriteFailed {
        /// Output path
        path: PathBuf,
        /// Failure reason
        reason: String,
    },

    /// Closing the encode sink failed
    #[error("Failed to close encode sink at {path:?}: {reason}")]
    SinkCloseFailed {
        /// Output path
        path: PathBuf,
        /// Failure reason
        reason: String,
    },

    /// Camera id is not configured
    #[error("Camera not found: {camera_id}")]
    CameraNotFound {
        /// Camera identifier
        camera_id: String,
    },

    /// Camera exists but is not capturing
    #[error("Camera not active: {camera_id}")]
    CameraNotActive {
        /// Camera identifier
        camera_id: String,
    },

    /// A recording is already running on this camera
    #[error("Camera {camera_id} is already recording")]
    AlreadyRecording {
        /// Camera identifier
        camera_id: String,
    },

    /// No recording is running on this camera
    #[error("Camera {camera_id} is not recording")]
    NotRecording {
        /// Camera identifier
        camera_id: String,
    },

    /// Invalid configuration provided
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Error message
        message: String,
    },

    /// Initialization error
    #[error("Initialization failed: {reason}")]
    Initialization {
        /// Reason for initialization failure
        reason: String,
    },

    /// Transport library error outside of negotiation
    #[error("Transport error: {reason}")]
    Transport {
        /// Reason for transport error
        reason: String,
    },

    /// Resource limit exceeded
    #[error("Resource limit exceeded: {resource} (limit {limit})")]
    ResourceLimit {
        /// Resource that exceeded limit
        resource: String,
        /// Configured limit
        limit: usize,
    },

    /// A blocking job on the worker pool did not complete
    #[error("Worker pool error: {reason}")]
    WorkerPool {
        /// Failure reason
        reason: String,
    },

    /// I/O operation failed
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// JSON (de)serialization failed
    #[error("JSON error: {source}")]
    Json {
        /// Underlying serde_json error
        #[from]
        source: serde_json::Error,
    },
}

/// Result type alias for CamStream operations
pub type Result<T> = std::result::Result<T, CamStreamError>;

impl CamStreamError {
    /// Check if retrying the operation may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            CamStreamError::DeviceOpenFailed { .. } => true,
            CamStreamError::DeviceReadTimeout { .. } => true,
            CamStreamError::DeviceReadFailed { .. } => true,
            CamStreamError::CandidateRejected { .. } => true,
            CamStreamError::SinkWriteFailed { .. } => true,
            CamStreamError::CameraNotActive { .. } => true,
            CamStreamError::ResourceLimit { .. } => true,
            CamStreamError::Io { .. } => true,
            CamStreamError::NegotiationFailed { .. } => false,
            CamStreamError::InvalidConfiguration { .. } => false,
            _ => false,
        }
    }

    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            CamStreamError::DeviceOpenFailed { .. }
            | CamStreamError::DeviceReadTimeout { .. }
            | CamStreamError::DeviceReadFailed { .. }
            | CamStreamError::CameraNotFound { .. }
            | CamStreamError::CameraNotActive { .. } => ErrorCategory::Device,
            CamStreamError::NegotiationFailed { .. }
            | CamStreamError::UnknownSession { .. }
            | CamStreamError::CandidateRejected { .. }
            | CamStreamError::Transport { .. } => ErrorCategory::Session,
            CamStreamError::SinkOpenFailed { .. }
            | CamStreamError::SinkWriteFailed { .. }
            | CamStreamError::SinkCloseFailed { .. }
            | CamStreamError::AlreadyRecording { .. }
            | CamStreamError::NotRecording { .. } => ErrorCategory::Recording,
            CamStreamError::InvalidConfiguration { .. } | CamStreamError::Json { .. } => {
                ErrorCategory::Configuration
            }
            CamStreamError::Initialization { .. }
            | CamStreamError::ResourceLimit { .. }
            | CamStreamError::WorkerPool { .. }
            | CamStreamError::Io { .. } => ErrorCategory::System,
        }
    }

    /// Stable numeric code for API responses
    pub fn error_code(&self) -> u32 {
        match self {
            CamStreamError::DeviceOpenFailed { .. } => 1001,
            CamStreamError::DeviceReadTimeout { .. } => 1002,
            CamStreamError::DeviceReadFailed { .. } => 1003,
            CamStreamError::CameraNotFound { .. } => 1004,
            CamStreamError::CameraNotActive { .. } => 1005,
            CamStreamError::NegotiationFailed { .. } => 2001,
            CamStreamError::UnknownSession { .. } => 2002,
            CamStreamError::CandidateRejected { .. } => 2003,
            CamStreamError::Transport { .. } => 2004,
            CamStreamError::SinkOpenFailed { .. } => 3001,
            CamStreamError::SinkWriteFailed { .. } => 3002,
            CamStreamError::SinkCloseFailed { .. } => 3003,
            CamStreamError::AlreadyRecording { .. } => 3004,
            CamStreamError::NotRecording { .. } => 3005,
            CamStreamError::InvalidConfiguration { .. } => 4001,
            CamStreamError::Json { .. } => 4002,
            CamStreamError::Initialization { .. } => 5001,
            CamStreamError::ResourceLimit { .. } => 5002,
            CamStreamError::WorkerPool { .. } => 5003,
            CamStreamError::Io { .. } => 5004,
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Camera hardware and capture errors
    Device,
    /// Streaming session and transport errors
    Session,
    /// Recording sink errors
    Recording,
    /// Configuration and parameter errors
    Configuration,
    /// System-level errors (I/O, worker pool, limits)
    System,
}
