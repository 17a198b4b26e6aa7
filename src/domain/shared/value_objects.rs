//! Shared value objects used across the negotiation layers

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::error::CallError;

/// Call identifier
///
/// A 128-bit random value, textually encoded as a hyphenated UUID. Both
/// peers agree on it before any media chunk is relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(Uuid);

impl CallId {
    /// Generate a fresh identifier for a new call attempt
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CallId {
    type Err = CallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| CallError::MalformedMessage(format!("invalid call id '{}': {}", s, e)))
    }
}

/// Which half of the offer/answer exchange a description belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptionKind {
    Offer,
    Answer,
}

impl DescriptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DescriptionKind::Offer => "offer",
            DescriptionKind::Answer => "answer",
        }
    }
}

/// Session description produced or accepted by the negotiation engine
///
/// The SDP body is opaque to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: DescriptionKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// One connectivity (ICE) candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }

    pub fn with_mid(mut self, sdp_mid: impl Into<String>, sdp_mline_index: u16) -> Self {
        self.sdp_mid = Some(sdp_mid.into());
        self.sdp_mline_index = Some(sdp_mline_index);
        self
    }
}

/// Direction label attached to a relayed media chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkKind {
    CallerVideo,
    CalleeVideo,
    CallerAudio,
    CalleeAudio,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::CallerVideo => "callerVideo",
            ChunkKind::CalleeVideo => "calleeVideo",
            ChunkKind::CallerAudio => "callerAudio",
            ChunkKind::CalleeAudio => "calleeAudio",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "callerVideo" => Some(ChunkKind::CallerVideo),
            "calleeVideo" => Some(ChunkKind::CalleeVideo),
            "callerAudio" => Some(ChunkKind::CallerAudio),
            "calleeAudio" => Some(ChunkKind::CalleeAudio),
            _ => None,
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque media chunk tagged with its call and direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaChunk {
    pub call_id: CallId,
    pub kind: ChunkKind,
    pub data: Bytes,
}

/// Handle to acquired local capture media
///
/// Not `Clone`: releasing it consumes the handle, so it can be released once.
#[derive(Debug, PartialEq, Eq)]
pub struct MediaHandle(Uuid);

impl MediaHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl Default for MediaHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Media kind of a remote track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Remote inbound track announced by the negotiation engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
}
