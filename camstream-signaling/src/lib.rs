//! # CamStream Signaling
//!
//! Per-viewer streaming sessions. The session manager negotiates one peer
//! connection per viewer through an external real-time transport and feeds
//! it from a paced, failure-tolerant track reading the camera's frame
//! buffer.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod manager;
pub mod protocol;
pub mod track;
pub mod transport;

// Re-export main types
pub use manager::{HealthMonitor, SessionManagerConfig, StreamSessionManager};
pub use protocol::{
    CandidateOutcome, IceCandidateInit, IceServer, SdpType, SessionAnswer, SessionDescription,
    SessionStatus,
};
pub use track::{CameraFeed, TrackAdapter, TrackAdapterConfig};
pub use transport::{
    ConnectionState, IceConnectionState, IceGatheringState, PeerConnection, RtcTransport,
    SignalingState, StateChange, StateChangeHandler, TransportFrame, TransportSnapshot,
    VideoSource, VIDEO_CLOCK_RATE,
};
