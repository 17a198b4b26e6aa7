//! Callwire - call session negotiation over a websocket signaling relay
//!
//! Layered the Domain-Driven Design way: the call domain (session aggregate,
//! candidate queue, collaborator ports), the coordinator that drives it, the
//! signaling transport and WebRTC adapter, and the relay server peers meet on.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;

// Re-export commonly used types
pub use application::{CoordinatorConfig, CoordinatorHandle, NegotiationCoordinator};
pub use domain::shared::error::CallError;
pub use domain::shared::result::Result;
