//! Interface to the real-time media transport library
//!
//! SDP/ICE handling, codecs and packetization live in the transport. The
//! session manager only drives it through [`RtcTransport`] and
//! [`PeerConnection`], and feeds it frames through [`VideoSource`].

use crate::protocol::{IceCandidateInit, IceServer, SessionDescription};
use async_trait::async_trait;
use camstream_core::{Result, VideoFrame};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// RTP clock rate used for video timestamps
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

/// Peer connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Created, nothing negotiated
    New,
    /// Negotiating
    Connecting,
    /// Media flowing
    Connected,
    /// Connectivity lost, may recover
    Disconnected,
    /// Connectivity lost for good
    Failed,
    /// Closed by either side
    Closed,
}

impl ConnectionState {
    /// Whether the session should be torn down
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }

    /// Lowercase name, as browsers report it
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ICE connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceConnectionState {
    /// Waiting for candidates
    New,
    /// Checking candidate pairs
    Checking,
    /// A usable pair was found
    Connected,
    /// Checking finished
    Completed,
    /// Connectivity lost, may recover
    Disconnected,
    /// No usable pair
    Failed,
    /// ICE agent shut down
    Closed,
}

impl IceConnectionState {
    /// Whether the session should be torn down
    pub fn is_terminal(&self) -> bool {
        matches!(self, IceConnectionState::Failed | IceConnectionState::Closed)
    }

    /// Whether media can flow
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            IceConnectionState::Connected | IceConnectionState::Completed
        )
    }

    /// Lowercase name, as browsers report it
    pub fn as_str(&self) -> &'static str {
        match self {
            IceConnectionState::New => "new",
            IceConnectionState::Checking => "checking",
            IceConnectionState::Connected => "connected",
            IceConnectionState::Completed => "completed",
            IceConnectionState::Disconnected => "disconnected",
            IceConnectionState::Failed => "failed",
            IceConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for IceConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ICE candidate gathering state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceGatheringState {
    /// Not started
    New,
    /// Collecting candidates
    Gathering,
    /// Done
    Complete,
}

impl fmt::Display for IceGatheringState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IceGatheringState::New => "new",
            IceGatheringState::Gathering => "gathering",
            IceGatheringState::Complete => "complete",
        })
    }
}

/// Offer/answer signaling state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalingState {
    /// No exchange in progress
    Stable,
    /// Local offer applied
    HaveLocalOffer,
    /// Remote offer applied
    HaveRemoteOffer,
    /// Connection closed
    Closed,
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SignalingState::Stable => "stable",
            SignalingState::HaveLocalOffer => "have-local-offer",
            SignalingState::HaveRemoteOffer => "have-remote-offer",
            SignalingState::Closed => "closed",
        })
    }
}

/// All transport states of one peer connection at an instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSnapshot {
    /// Peer connection state
    pub connection: ConnectionState,
    /// ICE connection state
    pub ice_connection: IceConnectionState,
    /// ICE gathering state
    pub ice_gathering: IceGatheringState,
    /// Signaling state
    pub signaling: SignalingState,
}

impl TransportSnapshot {
    /// Whether either state machine reached a terminal state
    pub fn is_terminal(&self) -> bool {
        self.connection.is_terminal() || self.ice_connection.is_terminal()
    }
}

impl Default for TransportSnapshot {
    fn default() -> Self {
        Self {
            connection: ConnectionState::New,
            ice_connection: IceConnectionState::New,
            ice_gathering: IceGatheringState::New,
            signaling: SignalingState::Stable,
        }
    }
}

/// State change reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    /// Peer connection state changed
    Connection(ConnectionState),
    /// ICE connection state changed
    IceConnection(IceConnectionState),
}

/// Callback invoked by the transport on every state change
pub type StateChangeHandler = Box<dyn Fn(StateChange) + Send + Sync>;

/// Frame handed to the transport for encoding
#[derive(Debug, Clone)]
pub struct TransportFrame {
    /// RGB image
    pub frame: VideoFrame,
    /// Presentation timestamp in [`VIDEO_CLOCK_RATE`] units
    pub pts: u64,
    /// Clock rate of `pts`
    pub clock_rate: u32,
    /// True for generated (black) frames
    pub synthetic: bool,
}

/// Pull-based video source the transport reads from at its own cadence
#[async_trait]
pub trait VideoSource: Send + Sync {
    /// Produce the next frame, waiting until it is due
    async fn next_frame(&self) -> TransportFrame;
}

/// One negotiated peer connection
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Attach an outgoing video track
    fn add_track(&self, source: Arc<dyn VideoSource>) -> Result<()>;

    /// Apply the viewer's offer
    async fn set_remote_description(&self, offer: SessionDescription) -> Result<()>;

    /// Create and apply the local answer
    async fn create_answer(&self) -> Result<SessionDescription>;

    /// Add a remote ICE candidate
    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<()>;

    /// Register the state change callback, replacing any previous one
    fn on_state_change(&self, handler: StateChangeHandler);

    /// Current transport states
    fn snapshot(&self) -> TransportSnapshot;

    /// Close the connection and stop pulling frames
    async fn close(&self) -> Result<()>;
}

/// Factory for peer connections
#[async_trait]
pub trait RtcTransport: Send + Sync {
    /// Create a peer connection using the given ICE servers
    async fn create_session(&self, ice_servers: &[IceServer]) -> Result<Arc<dyn PeerConnection>>;
}
