//! Candidates received before the remote description

use crate::domain::call::engine::NegotiationEngine;
use crate::domain::shared::value_objects::IceCandidate;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// FIFO buffer of remote candidates awaiting a remote description
#[derive(Debug, Default)]
pub struct CandidateQueue {
    pending: VecDeque<IceCandidate>,
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, candidate: IceCandidate) {
        self.pending.push_back(candidate);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Feed every buffered candidate to the engine in arrival order
    ///
    /// The queue is empty afterwards. A candidate the engine rejects is
    /// logged and skipped; it is not retried. Returns how many candidates
    /// the engine accepted.
    pub async fn drain_into(&mut self, engine: &dyn NegotiationEngine) -> usize {
        let mut accepted = 0;

        while let Some(candidate) = self.pending.pop_front() {
            match engine.add_candidate(candidate).await {
                Ok(()) => accepted += 1,
                Err(e) => warn!("Engine rejected queued candidate: {}", e),
            }
        }

        if accepted > 0 {
            debug!("Drained {} queued candidates", accepted);
        }
        accepted
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::engine::MockNegotiationEngine;
    use crate::domain::shared::error::CallError;
    use mockall::Sequence;

    #[tokio::test]
    async fn test_drain_preserves_arrival_order() {
        let mut queue = CandidateQueue::new();
        for name in ["a", "b", "c"] {
            queue.enqueue(IceCandidate::new(name));
        }

        let mut engine = MockNegotiationEngine::new();
        let mut seq = Sequence::new();
        for name in ["a", "b", "c"] {
            engine
                .expect_add_candidate()
                .withf(move |c| c.candidate == name)
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(()));
        }

        assert_eq!(queue.drain_into(&engine).await, 3);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_drain_on_empty_queue_is_noop() {
        let mut queue = CandidateQueue::new();
        let mut engine = MockNegotiationEngine::new();
        engine.expect_add_candidate().never();

        assert_eq!(queue.drain_into(&engine).await, 0);
    }

    #[tokio::test]
    async fn test_drain_happens_once() {
        let mut queue = CandidateQueue::new();
        queue.enqueue(IceCandidate::new("only"));

        let mut engine = MockNegotiationEngine::new();
        engine.expect_add_candidate().times(1).returning(|_| Ok(()));

        queue.drain_into(&engine).await;
        queue.drain_into(&engine).await;
    }

    #[tokio::test]
    async fn test_rejected_candidate_does_not_stop_drain() {
        let mut queue = CandidateQueue::new();
        queue.enqueue(IceCandidate::new("bad"));
        queue.enqueue(IceCandidate::new("good"));

        let mut engine = MockNegotiationEngine::new();
        engine
            .expect_add_candidate()
            .withf(|c| c.candidate == "bad")
            .returning(|_| Err(CallError::NegotiationEngine("parse".into())));
        engine
            .expect_add_candidate()
            .withf(|c| c.candidate == "good")
            .returning(|_| Ok(()));

        assert_eq!(queue.drain_into(&engine).await, 1);
        assert!(queue.is_empty());
    }
}
