//! Signaling wire messages
//!
//! One JSON object per message. The message kind is decided by which
//! fields are present:
//!
//! ```text
//! {"callId": ...}                                  announcement
//! {"offer": <description>, "callId"?: ...}         caller description
//! {"answer": <description>, "callId"?: ...}        callee description
//! {"candidate": <candidate>, "callId"?: ...}       one ICE candidate
//! {"type": "hangup", "callId"?: ...}               termination notice
//! {"type": "callerVideo", "data": <b64>, "callId"} media chunk
//! ```
//!
//! A description is either a bare SDP string or `{"type", "sdp"}`; a
//! candidate is either a bare candidate line or a candidate-init object.

use crate::domain::shared::error::CallError;
use crate::domain::shared::value_objects::{
    CallId, ChunkKind, DescriptionKind, IceCandidate, MediaChunk, SessionDescription,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde_json::{json, Map, Value};

/// Signaling message types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingMessage {
    /// Call-identifier announcement
    Announce { call_id: CallId },
    /// Caller's session description
    Offer {
        call_id: Option<CallId>,
        description: SessionDescription,
    },
    /// Callee's session description
    Answer {
        call_id: Option<CallId>,
        description: SessionDescription,
    },
    /// ICE candidate
    Candidate {
        call_id: Option<CallId>,
        candidate: IceCandidate,
    },
    /// Call hangup
    Hangup { call_id: Option<CallId> },
    /// Relayed media chunk
    Chunk(MediaChunk),
}

fn malformed(reason: impl Into<String>) -> CallError {
    CallError::MalformedMessage(reason.into())
}

impl SignalingMessage {
    /// Parse one inbound text frame
    pub fn parse(text: &str) -> Result<Self, CallError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| malformed(format!("invalid JSON: {}", e)))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, CallError> {
        let obj = match value {
            Value::Object(obj) => obj,
            other => return Err(malformed(format!("expected object, got {}", other))),
        };

        let call_id = parse_call_id(&obj)?;

        if let Some(label) = obj.get("type") {
            let label = label
                .as_str()
                .ok_or_else(|| malformed("'type' must be a string"))?;
            return Self::from_typed(label, &obj, call_id);
        }

        match (obj.get("offer"), obj.get("answer"), obj.get("candidate")) {
            (Some(offer), None, None) => Ok(SignalingMessage::Offer {
                call_id,
                description: parse_description(offer, DescriptionKind::Offer)?,
            }),
            (None, Some(answer), None) => Ok(SignalingMessage::Answer {
                call_id,
                description: parse_description(answer, DescriptionKind::Answer)?,
            }),
            (None, None, Some(candidate)) => Ok(SignalingMessage::Candidate {
                call_id,
                candidate: parse_candidate(candidate)?,
            }),
            (None, None, None) => match call_id {
                Some(call_id) => Ok(SignalingMessage::Announce { call_id }),
                None => Err(malformed("unrecognized message shape")),
            },
            _ => Err(malformed("message carries more than one payload")),
        }
    }

    fn from_typed(
        label: &str,
        obj: &Map<String, Value>,
        call_id: Option<CallId>,
    ) -> Result<Self, CallError> {
        if label == "hangup" {
            return Ok(SignalingMessage::Hangup { call_id });
        }

        if let Some(kind) = ChunkKind::from_label(label) {
            let call_id =
                call_id.ok_or_else(|| malformed(format!("{} chunk without call id", label)))?;
            let data = obj
                .get("data")
                .and_then(Value::as_str)
                .ok_or_else(|| malformed(format!("{} chunk without data", label)))?;
            let data = STANDARD
                .decode(data)
                .map_err(|e| malformed(format!("{} chunk is not base64: {}", label, e)))?;
            return Ok(SignalingMessage::Chunk(MediaChunk {
                call_id,
                kind,
                data: Bytes::from(data),
            }));
        }

        // Browser-style RTCSessionDescription JSON: {"type": "offer", "sdp": ...}
        let sdp = obj.get("sdp").and_then(Value::as_str);
        match (label, sdp) {
            ("offer", Some(sdp)) => Ok(SignalingMessage::Offer {
                call_id,
                description: SessionDescription::offer(sdp),
            }),
            ("answer", Some(sdp)) => Ok(SignalingMessage::Answer {
                call_id,
                description: SessionDescription::answer(sdp),
            }),
            _ => Err(malformed(format!("unknown message type '{}'", label))),
        }
    }

    /// Call the message belongs to, when it says
    pub fn call_id(&self) -> Option<CallId> {
        match self {
            SignalingMessage::Announce { call_id } => Some(*call_id),
            SignalingMessage::Offer { call_id, .. } => *call_id,
            SignalingMessage::Answer { call_id, .. } => *call_id,
            SignalingMessage::Candidate { call_id, .. } => *call_id,
            SignalingMessage::Hangup { call_id } => *call_id,
            SignalingMessage::Chunk(chunk) => Some(chunk.call_id),
        }
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::Announce { .. } => "callId",
            SignalingMessage::Offer { .. } => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::Candidate { .. } => "candidate",
            SignalingMessage::Hangup { .. } => "hangup",
            SignalingMessage::Chunk(chunk) => chunk.kind.as_str(),
        }
    }

    pub fn to_json(&self) -> Value {
        let mut obj = match self {
            SignalingMessage::Announce { .. } => json!({}),
            SignalingMessage::Offer { description, .. } => json!({ "offer": description }),
            SignalingMessage::Answer { description, .. } => json!({ "answer": description }),
            SignalingMessage::Candidate { candidate, .. } => json!({ "candidate": candidate }),
            SignalingMessage::Hangup { .. } => json!({ "type": "hangup" }),
            SignalingMessage::Chunk(chunk) => json!({
                "type": chunk.kind.as_str(),
                "data": STANDARD.encode(&chunk.data),
            }),
        };

        if let (Some(call_id), Value::Object(map)) = (self.call_id(), &mut obj) {
            map.insert("callId".to_string(), Value::String(call_id.to_string()));
        }
        obj
    }

    /// Encode as one text frame
    pub fn encode(&self) -> String {
        self.to_json().to_string()
    }
}

fn parse_call_id(obj: &Map<String, Value>) -> Result<Option<CallId>, CallError> {
    match obj.get("callId") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => s.parse().map(Some),
        Some(other) => Err(malformed(format!("callId must be a string, got {}", other))),
    }
}

fn parse_description(value: &Value, expected: DescriptionKind) -> Result<SessionDescription, CallError> {
    match value {
        Value::String(sdp) => Ok(SessionDescription {
            kind: expected,
            sdp: sdp.clone(),
        }),
        Value::Object(obj) => {
            let sdp = obj
                .get("sdp")
                .and_then(Value::as_str)
                .ok_or_else(|| malformed(format!("{} without sdp", expected.as_str())))?;
            if let Some(kind) = obj.get("type").and_then(Value::as_str) {
                if kind != expected.as_str() {
                    return Err(malformed(format!(
                        "{} field carries a '{}' description",
                        expected.as_str(),
                        kind
                    )));
                }
            }
            Ok(SessionDescription {
                kind: expected,
                sdp: sdp.to_string(),
            })
        }
        other => Err(malformed(format!(
            "{} must be a string or object, got {}",
            expected.as_str(),
            other
        ))),
    }
}

fn parse_candidate(value: &Value) -> Result<IceCandidate, CallError> {
    match value {
        Value::String(line) if !line.is_empty() => Ok(IceCandidate::new(line.clone())),
        Value::Object(_) => serde_json::from_value(value.clone())
            .map_err(|e| malformed(format!("invalid candidate: {}", e))),
        other => Err(malformed(format!("invalid candidate: {}", other))),
    }
}
