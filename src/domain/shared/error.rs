//! Call errors

use thiserror::Error;

/// Errors raised while negotiating a call
///
/// Only `DeviceUnavailable` and `NegotiationEngine` terminate a call attempt
/// from the caller's point of view; the other kinds are recovered where they
/// occur (queued, retried or dropped).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("Transport disconnected: {0}")]
    TransportDisconnected(String),

    #[error("Media device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Unexpected state: {0}")]
    UnexpectedState(String),

    #[error("Negotiation engine failure: {0}")]
    NegotiationEngine(String),

    #[error("Coordinator is no longer running")]
    ChannelClosed,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CallError {
    /// Whether this error ends the current call attempt
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallError::DeviceUnavailable(_) | CallError::NegotiationEngine(_)
        )
    }
}

impl From<config::ConfigError> for CallError {
    fn from(err: config::ConfigError) -> Self {
        CallError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_errors() {
        assert!(CallError::DeviceUnavailable("no camera".into()).is_terminal());
        assert!(CallError::NegotiationEngine("ice".into()).is_terminal());
        assert!(!CallError::MalformedMessage("{}".into()).is_terminal());
        assert!(!CallError::UnexpectedState("idle".into()).is_terminal());
        assert!(!CallError::TransportDisconnected("eof".into()).is_terminal());
    }
}
