//! Call events surfaced to the embedding application

use crate::domain::call::value_object::{CallRole, CallState, EndReason};
use crate::domain::shared::value_objects::{CallId, MediaChunk, RemoteTrack};

/// Something the user interface may want to react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    /// Offer sent to the peer, waiting for an answer
    OfferSent { call_id: CallId },
    /// Show the incoming-call prompt
    IncomingCall { call_id: CallId },
    /// Hide the incoming-call prompt
    IncomingCallDismissed { call_id: CallId },
    /// Offer and answer exchanged
    Connected { call_id: CallId },
    /// Remote media started flowing
    RemoteTrack { call_id: CallId, track: RemoteTrack },
    /// Media chunk relayed by the peer
    ChunkReceived { chunk: MediaChunk },
    /// Session reset to idle
    Ended {
        call_id: CallId,
        reason: EndReason,
        duration_seconds: Option<i64>,
    },
}

impl CallEvent {
    pub fn call_id(&self) -> &CallId {
        match self {
            CallEvent::OfferSent { call_id } => call_id,
            CallEvent::IncomingCall { call_id } => call_id,
            CallEvent::IncomingCallDismissed { call_id } => call_id,
            CallEvent::Connected { call_id } => call_id,
            CallEvent::RemoteTrack { call_id, .. } => call_id,
            CallEvent::ChunkReceived { chunk } => &chunk.call_id,
            CallEvent::Ended { call_id, .. } => call_id,
        }
    }
}

/// Observable snapshot of the negotiator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStatus {
    pub state: CallState,
    pub call_id: Option<CallId>,
    pub role: Option<CallRole>,
    pub local_media: bool,
    pub remote_media: bool,
}

impl CallStatus {
    pub fn idle() -> Self {
        Self {
            state: CallState::Idle,
            call_id: None,
            role: None,
            local_media: false,
            remote_media: false,
        }
    }
}

impl Default for CallStatus {
    fn default() -> Self {
        Self::idle()
    }
}
