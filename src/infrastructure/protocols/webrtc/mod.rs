//! WebRTC negotiation engine adapter
pub mod engine;

pub use engine::{WebRtcEngine, WebRtcEngineFactory};
