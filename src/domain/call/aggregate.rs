//! Call session aggregate root

use crate::domain::call::candidate_queue::CandidateQueue;
use crate::domain::call::engine::NegotiationEngine;
use crate::domain::call::value_object::{CallRole, CallState};
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{CallId, IceCandidate, MediaHandle, SessionDescription};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Call session aggregate root
///
/// The unit of negotiation. Owns the descriptions exchanged so far, the
/// candidates waiting for a remote description, the local media handle
/// and the engine handle. Each description can be set once; a new
/// negotiation needs a new session.
pub struct CallSession {
    id: CallId,
    role: CallRole,
    state: CallState,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    pending_candidates: CandidateQueue,
    media: Option<MediaHandle>,
    engine: Option<Box<dyn NegotiationEngine>>,
    remote_media: bool,
    closing: bool,
    created_at: DateTime<Utc>,
    connected_at: Option<DateTime<Utc>>,
}

impl CallSession {
    pub fn new(id: CallId, role: CallRole) -> Self {
        Self {
            id,
            role,
            state: CallState::Idle,
            local_description: None,
            remote_description: None,
            pending_candidates: CandidateQueue::new(),
            media: None,
            engine: None,
            remote_media: false,
            closing: false,
            created_at: Utc::now(),
            connected_at: None,
        }
    }

    /// Transition to a new state
    pub fn transition_to(&mut self, new_state: CallState) -> Result<()> {
        if !self.state.can_transition_to(new_state) {
            return Err(CallError::UnexpectedState(format!(
                "Cannot transition from {:?} to {:?}",
                self.state, new_state
            )));
        }

        if new_state == CallState::Connected {
            self.connected_at = Some(Utc::now());
        }
        debug!("Call {} {:?} -> {:?}", self.id, self.state, new_state);
        self.state = new_state;
        Ok(())
    }

    pub fn set_local_description(&mut self, description: SessionDescription) -> Result<()> {
        if self.local_description.is_some() {
            return Err(CallError::UnexpectedState(format!(
                "Call {} already has a local description",
                self.id
            )));
        }
        self.local_description = Some(description);
        Ok(())
    }

    /// Record the remote description
    ///
    /// Refuses to overwrite one that is already set, which is also how a
    /// second offer during glare is turned away.
    pub fn set_remote_description(&mut self, description: SessionDescription) -> Result<()> {
        if self.remote_description.is_some() {
            return Err(CallError::UnexpectedState(format!(
                "Call {} already has a remote description",
                self.id
            )));
        }
        self.remote_description = Some(description);
        Ok(())
    }

    pub fn attach_engine(&mut self, engine: Box<dyn NegotiationEngine>) {
        self.engine = Some(engine);
    }

    pub fn engine(&self) -> Result<&dyn NegotiationEngine> {
        self.engine
            .as_deref()
            .ok_or_else(|| CallError::UnexpectedState(format!("Call {} has no engine", self.id)))
    }

    pub fn attach_media(&mut self, handle: MediaHandle) {
        self.media = Some(handle);
    }

    pub fn take_media(&mut self) -> Option<MediaHandle> {
        self.media.take()
    }

    pub fn take_engine(&mut self) -> Option<Box<dyn NegotiationEngine>> {
        self.engine.take()
    }

    pub fn mark_remote_media(&mut self) {
        self.remote_media = true;
    }

    /// Route a remote candidate
    ///
    /// Goes straight to the engine once the remote description is known,
    /// otherwise waits in the pending queue.
    pub async fn add_remote_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        if self.remote_description.is_none() {
            self.pending_candidates.enqueue(candidate);
            debug!(
                "Queued candidate for call {} ({} pending)",
                self.id,
                self.pending_candidates.len()
            );
            return Ok(());
        }

        self.engine()?.add_candidate(candidate).await
    }

    /// Flush candidates that arrived before the remote description
    pub async fn drain_pending_candidates(&mut self) -> Result<usize> {
        if self.remote_description.is_none() {
            return Err(CallError::UnexpectedState(format!(
                "Call {} cannot drain candidates without a remote description",
                self.id
            )));
        }

        let engine = self
            .engine
            .as_deref()
            .ok_or_else(|| CallError::UnexpectedState(format!("Call {} has no engine", self.id)))?;
        Ok(self.pending_candidates.drain_into(engine).await)
    }

    /// Mark the session as closing
    ///
    /// Returns false when teardown already started, so overlapping causes
    /// release resources only once.
    pub fn begin_closing(&mut self) -> bool {
        if self.closing {
            return false;
        }
        self.closing = true;
        if self.state.can_transition_to(CallState::Closing) {
            self.state = CallState::Closing;
        }
        self.pending_candidates.clear();
        true
    }

    pub fn duration_seconds(&self) -> Option<i64> {
        self.connected_at
            .map(|connected| (Utc::now() - connected).num_seconds())
    }

    // Getters
    pub fn id(&self) -> &CallId {
        &self.id
    }

    pub fn role(&self) -> CallRole {
        self.role
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    pub fn pending_candidate_count(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn has_local_media(&self) -> bool {
        self.media.is_some()
    }

    pub fn has_remote_media(&self) -> bool {
        self.remote_media
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    pub fn created_at(&self) -> &DateTime<Utc> {
        &self.created_at
    }

    pub fn connected_at(&self) -> Option<&DateTime<Utc>> {
        self.connected_at.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::engine::MockNegotiationEngine;
    use mockall::Sequence;

    fn create_test_session(role: CallRole) -> CallSession {
        CallSession::new(CallId::generate(), role)
    }

    #[test]
    fn test_caller_lifecycle() {
        let mut session = create_test_session(CallRole::Caller);
        assert_eq!(session.state(), CallState::Idle);

        session.transition_to(CallState::Offering).unwrap();
        session.transition_to(CallState::Connected).unwrap();
        assert!(session.connected_at().is_some());
        assert!(session.duration_seconds().is_some());

        assert!(session.begin_closing());
        assert_eq!(session.state(), CallState::Closing);
    }

    #[test]
    fn test_invalid_state_transition() {
        let mut session = create_test_session(CallRole::Callee);
        let result = session.transition_to(CallState::Connected);
        assert!(matches!(result, Err(CallError::UnexpectedState(_))));
    }

    #[test]
    fn test_descriptions_set_once() {
        let mut session = create_test_session(CallRole::Callee);
        session
            .set_remote_description(SessionDescription::offer("v=0 first"))
            .unwrap();

        let second = session.set_remote_description(SessionDescription::offer("v=0 second"));
        assert!(second.is_err());
        assert_eq!(session.remote_description().unwrap().sdp, "v=0 first");

        session
            .set_local_description(SessionDescription::answer("v=0 mine"))
            .unwrap();
        assert!(session
            .set_local_description(SessionDescription::answer("v=0 again"))
            .is_err());
    }

    #[test]
    fn test_begin_closing_only_once() {
        let mut session = create_test_session(CallRole::Caller);
        session.transition_to(CallState::Offering).unwrap();

        assert!(session.begin_closing());
        assert!(!session.begin_closing());
        assert!(session.is_closing());
    }

    #[test]
    fn test_media_released_once() {
        let mut session = create_test_session(CallRole::Caller);
        session.attach_media(MediaHandle::new());
        assert!(session.has_local_media());

        assert!(session.take_media().is_some());
        assert!(session.take_media().is_none());
        assert!(!session.has_local_media());
    }

    #[tokio::test]
    async fn test_candidates_wait_for_remote_description() {
        let mut session = create_test_session(CallRole::Caller);

        let mut engine = MockNegotiationEngine::new();
        let mut seq = Sequence::new();
        for name in ["c1", "c2", "c3"] {
            engine
                .expect_add_candidate()
                .withf(move |c| c.candidate == name)
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(()));
        }
        session.attach_engine(Box::new(engine));

        session.add_remote_candidate(IceCandidate::new("c1")).await.unwrap();
        session.add_remote_candidate(IceCandidate::new("c2")).await.unwrap();
        assert_eq!(session.pending_candidate_count(), 2);

        session
            .set_remote_description(SessionDescription::answer("v=0"))
            .unwrap();
        assert_eq!(session.drain_pending_candidates().await.unwrap(), 2);
        assert_eq!(session.pending_candidate_count(), 0);

        // Remote description known: no more queuing
        session.add_remote_candidate(IceCandidate::new("c3")).await.unwrap();
        assert_eq!(session.pending_candidate_count(), 0);
    }

    #[tokio::test]
    async fn test_drain_requires_remote_description() {
        let mut session = create_test_session(CallRole::Caller);
        session.attach_engine(Box::new(MockNegotiationEngine::new()));
        assert!(session.drain_pending_candidates().await.is_err());
    }
}
