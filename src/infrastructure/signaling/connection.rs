//! Transport-level connection state

use super::message::SignalingMessage;
use crate::domain::shared::value_objects::CallId;
use std::collections::VecDeque;
use tracing::debug;

/// Connection status toward the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Open,
}

/// Status plus the messages waiting for the connection to open
///
/// A send while not open is appended, never dropped. The queue only
/// shrinks when it is flushed on open or when a torn-down call's
/// messages are discarded.
#[derive(Debug)]
pub struct SignalingConnection {
    status: ConnectionStatus,
    outbound: VecDeque<SignalingMessage>,
}

impl SignalingConnection {
    pub fn new() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            outbound: VecDeque::new(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            debug!("Signaling connection {:?} -> {:?}", self.status, status);
            self.status = status;
        }
    }

    /// Accept a message for sending
    ///
    /// Returns it back when the connection is open and it may go out
    /// immediately; otherwise keeps it queued.
    pub fn send(&mut self, message: SignalingMessage) -> Option<SignalingMessage> {
        if self.status == ConnectionStatus::Open && self.outbound.is_empty() {
            return Some(message);
        }
        self.outbound.push_back(message);
        None
    }

    /// Queue a message regardless of status
    pub fn enqueue(&mut self, message: SignalingMessage) {
        self.outbound.push_back(message);
    }

    /// Next queued message to flush, oldest first
    pub fn next_queued(&mut self) -> Option<SignalingMessage> {
        self.outbound.pop_front()
    }

    /// Put back a message whose write failed, ahead of everything else
    pub fn requeue_front(&mut self, message: SignalingMessage) {
        self.outbound.push_front(message);
    }

    /// Drop queued messages belonging to a torn-down call
    pub fn discard_call(&mut self, call_id: &CallId) -> usize {
        let before = self.outbound.len();
        self.outbound
            .retain(|message| message.call_id().as_ref() != Some(call_id));
        before - self.outbound.len()
    }

    pub fn queued(&self) -> usize {
        self.outbound.len()
    }
}

impl Default for SignalingConnection {
    fn default() -> Self {
        Self::new()
    }
}
