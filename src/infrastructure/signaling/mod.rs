//! Signaling transport - wire format, outbound queue, reconnecting client
pub mod backoff;
pub mod connection;
pub mod message;
pub mod transport;

pub use backoff::ReconnectPolicy;
pub use connection::{ConnectionStatus, SignalingConnection};
pub use message::SignalingMessage;
pub use transport::{SignalingTransport, TransportCommand, TransportHandle};
