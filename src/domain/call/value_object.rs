//! Call value objects

use serde::{Deserialize, Serialize};

/// Which side of the call this endpoint plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallRole {
    /// Sent the offer
    Caller,
    /// Received the offer
    Callee,
}

/// Negotiation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallState {
    /// No call in progress
    Idle,
    /// Caller sent an offer and awaits the answer
    Offering,
    /// Callee received an offer and awaits the local answer
    IncomingOffer,
    /// Offer and answer exchanged
    Connected,
    /// Teardown in progress
    Closing,
}

impl CallState {
    /// Check if state transition is valid
    pub fn can_transition_to(&self, new_state: CallState) -> bool {
        use CallState::*;

        match (self, new_state) {
            (Idle, Offering) => true,
            (Idle, IncomingOffer) => true,

            (Offering, Connected) => true,
            (IncomingOffer, Connected) => true,

            // Every non-idle state may be torn down
            (Offering | IncomingOffer | Connected, Closing) => true,
            (Closing, Idle) => true,

            _ => false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CallState::Idle => "Idle",
            CallState::Offering => "Offering",
            CallState::IncomingOffer => "IncomingOffer",
            CallState::Connected => "Connected",
            CallState::Closing => "Closing",
        }
    }
}

/// Reason for call ending
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    /// This endpoint hung up
    LocalHangup,
    /// The peer sent a hangup notice
    RemoteHangup,
    /// No answer before the offer deadline
    OfferTimeout,
    /// Incoming call not answered before its deadline
    IncomingTimeout,
    /// Media device or negotiation engine failure
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_state_transitions() {
        assert!(CallState::Idle.can_transition_to(CallState::Offering));
        assert!(CallState::Idle.can_transition_to(CallState::IncomingOffer));
        assert!(CallState::Offering.can_transition_to(CallState::Connected));
        assert!(CallState::IncomingOffer.can_transition_to(CallState::Connected));
        assert!(CallState::Connected.can_transition_to(CallState::Closing));
        assert!(CallState::Closing.can_transition_to(CallState::Idle));
    }

    #[test]
    fn test_invalid_state_transitions() {
        assert!(!CallState::Idle.can_transition_to(CallState::Connected));
        assert!(!CallState::Idle.can_transition_to(CallState::Closing));
        assert!(!CallState::Offering.can_transition_to(CallState::IncomingOffer));
        assert!(!CallState::Connected.can_transition_to(CallState::Offering));
        assert!(!CallState::Closing.can_transition_to(CallState::Connected));
    }
}
