//! Protocol adapters
pub mod webrtc;
