//! Collaborator ports
//!
//! The negotiation engine and the media device are defined here as traits
//! (ports) and implemented in the infrastructure layer (adapters) or by the
//! embedding application.

use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{IceCandidate, MediaHandle, RemoteTrack, SessionDescription};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Asynchronous notifications raised by a negotiation engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A local connectivity candidate was gathered
    LocalCandidate(IceCandidate),
    /// The peer started sending a track
    RemoteTrack(RemoteTrack),
}

pub type EngineEventSender = mpsc::UnboundedSender<EngineEvent>;

/// Peer-connection primitive driven by the coordinator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NegotiationEngine: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Release the underlying connection
    async fn close(&self) -> Result<()>;
}

/// Opens one negotiation engine per call session
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn open(&self, events: EngineEventSender) -> Result<Box<dyn NegotiationEngine>>;
}

/// Local capture device
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaDevice: Send + Sync {
    /// Fails with `CallError::DeviceUnavailable` when there is no device or permission
    async fn acquire(&self) -> Result<MediaHandle>;

    async fn release(&self, handle: MediaHandle);
}
