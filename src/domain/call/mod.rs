//! Call bounded context - negotiation of a single two-party call

pub mod aggregate;
pub mod candidate_queue;
pub mod engine;
pub mod event;
pub mod value_object;

pub use aggregate::CallSession;
pub use candidate_queue::CandidateQueue;
pub use engine::{EngineEvent, EngineEventSender, EngineFactory, MediaDevice, NegotiationEngine};
pub use event::{CallEvent, CallStatus};
pub use value_object::{CallRole, CallState, EndReason};
