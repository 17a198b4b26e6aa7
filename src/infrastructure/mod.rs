//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - The signaling wire format and the reconnecting relay client
//! - The WebRTC adapter behind the negotiation engine port

pub mod protocols;
pub mod signaling;
