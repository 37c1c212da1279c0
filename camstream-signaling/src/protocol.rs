//! Signaling data shapes exchanged with viewers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Offer from the viewer
    Offer,
    /// Answer produced for an offer
    Answer,
    /// Provisional answer
    Pranswer,
    /// Rollback of a pending description
    Rollback,
}

/// SDP blob plus its kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Raw SDP text
    pub sdp: String,
    /// Description kind
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
}

impl SessionDescription {
    /// Build an offer
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type: SdpType::Offer,
        }
    }

    /// Build an answer
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type: SdpType::Answer,
        }
    }
}

/// Answer returned to the viewer, tagged with the session it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAnswer {
    /// Raw SDP text
    pub sdp: String,
    /// Always [`SdpType::Answer`]
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// Session the answer belongs to
    pub session_id: String,
}

/// ICE candidate as sent by browsers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateInit {
    /// Candidate line; empty means end of candidates
    #[serde(default)]
    pub candidate: String,
    /// Media stream identification tag
    #[serde(default)]
    pub sdp_mid: Option<String>,
    /// Index of the media description
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    /// ICE username fragment
    #[serde(default)]
    pub username_fragment: Option<String>,
}

impl IceCandidateInit {
    /// Candidate with only the candidate line set
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            ..Default::default()
        }
    }
}

/// STUN/TURN server handed to the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// Server URLs
    pub urls: Vec<String>,
    /// TURN username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// TURN credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// Unauthenticated server at `url`
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    /// Google's public STUN server
    pub fn default_stun() -> Self {
        Self::new("stun:stun.l.google.com:19302")
    }
}

/// Soft result of a candidate submission; never an error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateOutcome {
    /// Whether the candidate reached the transport
    pub success: bool,
    /// Why it did not
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CandidateOutcome {
    /// Candidate accepted
    pub fn accepted() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    /// Candidate dropped, with the reason
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(reason.into()),
        }
    }
}

/// Snapshot of one session as reported to the API layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    /// Whether the session exists
    pub exists: bool,
    /// Whether the transport reports `connected`
    pub connected: bool,
    /// Bound camera
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_id: Option<String>,
    /// Peer connection state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_state: Option<String>,
    /// ICE connection state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ice_connection_state: Option<String>,
    /// ICE gathering state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ice_gathering_state: Option<String>,
    /// Signaling state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signaling_state: Option<String>,
    /// Whether the track adapter is emitting camera frames
    pub stream_active: bool,
    /// Session creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl SessionStatus {
    /// Status for an id that has no session
    pub fn missing() -> Self {
        Self {
            exists: false,
            connected: false,
            camera_id: None,
            connection_state: None,
            ice_connection_state: None,
            ice_gathering_state: None,
            signaling_state: None,
            stream_active: false,
            created_at: None,
        }
    }
}
