//! Domain layer - Negotiation rules independent of any transport
//!
//! This layer contains:
//! - Aggregates: the call session and its invariants
//! - Value Objects: call ids, descriptions, candidates, media chunks
//! - Ports: traits for the negotiation engine and the media device
//! - Events: what the embedding application is told about a call

pub mod call;
pub mod shared;

// Re-export commonly used types
pub use shared::{CallError, Result};
