//! Application layer - Use cases and application services
//!
//! This layer drives the call domain:
//! - Serializing user actions, inbound signaling and deadlines onto one task
//! - Relaying media chunks once both ends agree on a call id
//! - Publishing call status and events to the embedding application

pub mod chunk_relay;
pub mod coordinator;
pub mod endpoint;

pub use chunk_relay::ChunkRelay;
pub use coordinator::{CoordinatorConfig, CoordinatorHandle, NegotiationCoordinator};
pub use endpoint::CallEndpoint;
