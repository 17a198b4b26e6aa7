//! Media chunk relay over the signaling transport

use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{CallId, ChunkKind, MediaChunk};
use crate::infrastructure::signaling::{SignalingMessage, TransportHandle};
use bytes::Bytes;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Wraps media chunks into wire messages for the agreed call
///
/// Bound to a call id once both ends know it. Chunks produced before the
/// call is connected wait in a bounded buffer (oldest dropped first) and go
/// out in order on `start`. The transport's own queue takes over from
/// there, so chunks sent during a reconnect keep their order.
pub struct ChunkRelay {
    transport: TransportHandle,
    call_id: Option<CallId>,
    active: bool,
    pending: VecDeque<MediaChunk>,
    capacity: usize,
}

impl ChunkRelay {
    pub fn new(transport: TransportHandle, capacity: usize) -> Self {
        Self {
            transport,
            call_id: None,
            active: false,
            pending: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Agree on the call id chunks will be tagged with
    pub fn bind(&mut self, call_id: CallId) {
        self.call_id = Some(call_id);
        self.active = false;
        self.pending.clear();
    }

    /// Begin sending; flushes anything buffered before the call connected
    pub fn start(&mut self) {
        if self.call_id.is_none() {
            warn!("Chunk relay started without a call id");
            return;
        }
        self.active = true;
        let flushed = self.pending.len();
        while let Some(chunk) = self.pending.pop_front() {
            if let Err(e) = self.transport.send(SignalingMessage::Chunk(chunk)) {
                warn!("{}", e);
            }
        }
        if flushed > 0 {
            debug!("Flushed {} buffered chunks", flushed);
        }
    }

    /// Stop sending and drop the relay's own buffer
    pub fn stop(&mut self) {
        if !self.pending.is_empty() {
            debug!("Discarding {} buffered chunks", self.pending.len());
        }
        self.pending.clear();
        self.active = false;
        self.call_id = None;
    }

    pub fn forward(&mut self, kind: ChunkKind, data: Bytes, call_id: CallId) -> Result<()> {
        let bound = self.call_id.ok_or_else(|| {
            CallError::MalformedMessage(format!(
                "{} chunk for call {} has no agreed call id",
                kind, call_id
            ))
        })?;
        if bound != call_id {
            return Err(CallError::UnexpectedState(format!(
                "{} chunk for call {} but relay is bound to {}",
                kind, call_id, bound
            )));
        }

        let chunk = MediaChunk {
            call_id,
            kind,
            data,
        };
        if self.active {
            if let Err(e) = self.transport.send(SignalingMessage::Chunk(chunk)) {
                warn!("Chunk for call {} not sent: {}", call_id, e);
            }
            return Ok(());
        }

        if self.pending.len() >= self.capacity {
            self.pending.pop_front();
            warn!("Chunk buffer full for call {}, dropping oldest", call_id);
        }
        self.pending.push_back(chunk);
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn call_id(&self) -> Option<CallId> {
        self.call_id
    }

    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}
