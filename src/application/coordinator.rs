//! Negotiation coordinator
//!
//! Owns the one call session this endpoint can have at a time, its two
//! deadlines and the chunk relay. Everything that touches the session
//! (user commands, inbound signaling, engine callbacks, deadline expiry) is
//! funnelled into a single task and handled one input at a time, so a
//! suspended engine call can never interleave with a second negotiation
//! step.

use crate::application::chunk_relay::ChunkRelay;
use crate::config::CallConfig;
use crate::domain::call::{
    CallEvent, CallRole, CallSession, CallState, CallStatus, EndReason, EngineEvent, EngineFactory,
    MediaDevice,
};
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{
    CallId, ChunkKind, IceCandidate, MediaChunk, SessionDescription,
};
use crate::infrastructure::signaling::{SignalingMessage, TransportHandle};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const COMMAND_CAPACITY: usize = 32;
const EVENT_CAPACITY: usize = 64;

/// Deadlines and buffer sizes for one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub offer_timeout: Duration,
    pub incoming_timeout: Duration,
    pub chunk_buffer: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            offer_timeout: Duration::from_secs(30),
            incoming_timeout: Duration::from_secs(30),
            chunk_buffer: 32,
        }
    }
}

impl From<&CallConfig> for CoordinatorConfig {
    fn from(config: &CallConfig) -> Self {
        Self {
            offer_timeout: config.offer_timeout(),
            incoming_timeout: config.incoming_timeout(),
            chunk_buffer: config.chunk_buffer,
        }
    }
}

enum Command {
    StartCall {
        reply: oneshot::Sender<Result<CallId>>,
    },
    Answer {
        reply: oneshot::Sender<Result<CallId>>,
    },
    HangUp {
        reply: oneshot::Sender<Result<()>>,
    },
    ForwardChunk {
        kind: ChunkKind,
        data: Bytes,
        call_id: CallId,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Public face of a running coordinator
#[derive(Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<CallStatus>,
    events: broadcast::Sender<CallEvent>,
}

impl CoordinatorHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| CallError::ChannelClosed)?;
        rx.await.map_err(|_| CallError::ChannelClosed)?
    }

    /// Place a call: acquire media, send the offer, arm the offer deadline
    pub async fn start_call(&self) -> Result<CallId> {
        self.request(|reply| Command::StartCall { reply }).await
    }

    /// Answer the incoming offer
    pub async fn answer(&self) -> Result<CallId> {
        self.request(|reply| Command::Answer { reply }).await
    }

    /// End the current call and tell the peer; a no-op when idle
    pub async fn hang_up(&self) -> Result<()> {
        self.request(|reply| Command::HangUp { reply }).await
    }

    pub async fn forward_chunk(&self, kind: ChunkKind, data: Bytes, call_id: CallId) -> Result<()> {
        self.request(|reply| Command::ForwardChunk {
            kind,
            data,
            call_id,
            reply,
        })
        .await
    }

    pub fn status(&self) -> CallStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    /// Wait until the call reaches `state`; false if the coordinator stopped
    pub async fn wait_for_state(&self, state: CallState) -> bool {
        let mut rx = self.status.clone();
        let reached = rx.wait_for(|status| status.state == state).await.is_ok();
        reached
    }
}

enum Input {
    Command(Command),
    Inbound(SignalingMessage),
    Engine(EngineEvent),
    EngineGone,
    OfferExpired,
    IncomingExpired,
}

/// Transport failures never fail the call; the message is logged and dropped
fn signal(transport: &TransportHandle, message: SignalingMessage) {
    if let Err(e) = transport.send(message) {
        warn!("{}", e);
    }
}

fn snapshot(session: Option<&CallSession>) -> CallStatus {
    match session {
        Some(session) => CallStatus {
            state: session.state(),
            call_id: Some(*session.id()),
            role: Some(session.role()),
            local_media: session.has_local_media(),
            remote_media: session.has_remote_media(),
        },
        None => CallStatus::idle(),
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn next_engine_event(
    events: &mut Option<mpsc::UnboundedReceiver<EngineEvent>>,
) -> Option<EngineEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Session negotiator task
pub struct NegotiationCoordinator {
    config: CoordinatorConfig,
    transport: TransportHandle,
    inbound: mpsc::UnboundedReceiver<SignalingMessage>,
    commands: mpsc::Receiver<Command>,
    engines: Arc<dyn EngineFactory>,
    media: Arc<dyn MediaDevice>,
    session: Option<CallSession>,
    engine_events: Option<mpsc::UnboundedReceiver<EngineEvent>>,
    announced: Option<CallId>,
    offer_deadline: Option<Instant>,
    incoming_deadline: Option<Instant>,
    chunk_relay: ChunkRelay,
    status: watch::Sender<CallStatus>,
    events: broadcast::Sender<CallEvent>,
}

impl NegotiationCoordinator {
    /// Create new coordinator and the handle that drives it
    pub fn new(
        config: CoordinatorConfig,
        transport: TransportHandle,
        inbound: mpsc::UnboundedReceiver<SignalingMessage>,
        engines: Arc<dyn EngineFactory>,
        media: Arc<dyn MediaDevice>,
    ) -> (Self, CoordinatorHandle) {
        let (command_tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let (status, status_rx) = watch::channel(CallStatus::idle());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let handle = CoordinatorHandle {
            commands: command_tx,
            status: status_rx,
            events: events.clone(),
        };

        let coordinator = Self {
            config,
            chunk_relay: ChunkRelay::new(transport.clone(), config.chunk_buffer),
            transport,
            inbound,
            commands,
            engines,
            media,
            session: None,
            engine_events: None,
            announced: None,
            offer_deadline: None,
            incoming_deadline: None,
            status,
            events,
        };

        (coordinator, handle)
    }

    pub fn spawn(
        config: CoordinatorConfig,
        transport: TransportHandle,
        inbound: mpsc::UnboundedReceiver<SignalingMessage>,
        engines: Arc<dyn EngineFactory>,
        media: Arc<dyn MediaDevice>,
    ) -> (CoordinatorHandle, JoinHandle<()>) {
        let (coordinator, handle) = Self::new(config, transport, inbound, engines, media);
        let task = tokio::spawn(coordinator.run());
        (handle, task)
    }

    /// Process inputs until every handle is dropped
    pub async fn run(mut self) {
        info!("Negotiation coordinator started");
        let mut inbound_open = true;

        loop {
            let offer_deadline = self.offer_deadline;
            let incoming_deadline = self.incoming_deadline;

            let input = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => Input::Command(command),
                    None => break,
                },
                message = self.inbound.recv(), if inbound_open => match message {
                    Some(message) => Input::Inbound(message),
                    None => {
                        warn!("Signaling transport closed its inbound channel");
                        inbound_open = false;
                        continue;
                    }
                },
                event = next_engine_event(&mut self.engine_events) => match event {
                    Some(event) => Input::Engine(event),
                    None => Input::EngineGone,
                },
                _ = expire(offer_deadline) => Input::OfferExpired,
                _ = expire(incoming_deadline) => Input::IncomingExpired,
            };

            self.handle(input).await;
        }

        self.teardown(EndReason::LocalHangup, true).await;
        info!("Negotiation coordinator stopped");
    }

    async fn handle(&mut self, input: Input) {
        match input {
            Input::Command(command) => self.handle_command(command).await,
            Input::Inbound(message) => self.handle_inbound(message).await,
            Input::Engine(event) => self.handle_engine_event(event),
            Input::EngineGone => {
                debug!("Engine event channel closed");
                self.engine_events = None;
            }
            Input::OfferExpired => {
                self.offer_deadline = None;
                if self.state() == CallState::Offering {
                    info!("No answer before the offer deadline");
                    self.teardown(EndReason::OfferTimeout, false).await;
                }
            }
            Input::IncomingExpired => {
                self.incoming_deadline = None;
                if self.state() == CallState::IncomingOffer {
                    info!("Incoming call not answered before its deadline");
                    self.teardown(EndReason::IncomingTimeout, false).await;
                }
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartCall { reply } => {
                let result = self.start_call().await;
                let _ = reply.send(result);
            }
            Command::Answer { reply } => {
                let result = self.answer().await;
                let _ = reply.send(result);
            }
            Command::HangUp { reply } => {
                if self.session.is_none() {
                    debug!("Hang up with no call in progress");
                } else {
                    self.teardown(EndReason::LocalHangup, true).await;
                }
                let _ = reply.send(Ok(()));
            }
            Command::ForwardChunk {
                kind,
                data,
                call_id,
                reply,
            } => {
                let _ = reply.send(self.chunk_relay.forward(kind, data, call_id));
            }
        }
    }

    async fn handle_inbound(&mut self, message: SignalingMessage) {
        debug!("Inbound {} message", message.kind());
        match message {
            SignalingMessage::Announce { call_id } => {
                if self.session.is_none() {
                    debug!("Peer announced call {}", call_id);
                    self.announced = Some(call_id);
                } else {
                    debug!("Ignoring announcement of call {} during a call", call_id);
                }
            }
            SignalingMessage::Offer {
                call_id,
                description,
            } => self.on_offer(call_id, description).await,
            SignalingMessage::Answer {
                call_id,
                description,
            } => self.on_answer(call_id, description).await,
            SignalingMessage::Candidate { call_id, candidate } => {
                self.on_candidate(call_id, candidate).await
            }
            SignalingMessage::Hangup { call_id } => self.on_hangup(call_id).await,
            SignalingMessage::Chunk(chunk) => self.on_chunk(chunk),
        }
    }

    fn handle_engine_event(&mut self, event: EngineEvent) {
        let Some(session) = self.session.as_mut() else {
            debug!("Dropping engine event with no call in progress");
            return;
        };
        if session.is_closing() {
            return;
        }
        let call_id = *session.id();

        match event {
            EngineEvent::LocalCandidate(candidate) => {
                debug!("Sending local candidate for call {}", call_id);
                signal(&self.transport, SignalingMessage::Candidate {
                    call_id: Some(call_id),
                    candidate,
                });
            }
            EngineEvent::RemoteTrack(track) => {
                session.mark_remote_media();
                self.publish_status();
                self.emit(CallEvent::RemoteTrack { call_id, track });
            }
        }
    }

    async fn start_call(&mut self) -> Result<CallId> {
        if let Some(session) = &self.session {
            return Err(CallError::UnexpectedState(format!(
                "Cannot start a call while call {} is {}",
                session.id(),
                session.state().name()
            )));
        }

        let call_id = CallId::generate();
        info!("Starting call {}", call_id);

        let media = self.media.acquire().await.map_err(|e| {
            warn!("Cannot start call {}: {}", call_id, e);
            e
        })?;
        let mut session = CallSession::new(call_id, CallRole::Caller);
        session.attach_media(media);
        self.session = Some(session);

        match self.send_offer(call_id).await {
            Ok(()) => Ok(call_id),
            Err(e) => {
                warn!("Call {} failed while offering: {}", call_id, e);
                self.teardown(EndReason::Failed(e.to_string()), false).await;
                Err(e)
            }
        }
    }

    async fn send_offer(&mut self, call_id: CallId) -> Result<()> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let engine = self.engines.open(events_tx).await?;
        self.engine_events = Some(events_rx);

        let session = self.session_mut()?;
        session.attach_engine(engine);
        let offer = session.engine()?.create_offer().await?;
        session
            .engine()?
            .set_local_description(offer.clone())
            .await?;
        session.set_local_description(offer.clone())?;
        session.transition_to(CallState::Offering)?;

        self.chunk_relay.bind(call_id);
        signal(&self.transport, SignalingMessage::Announce { call_id });
        signal(&self.transport, SignalingMessage::Offer {
            call_id: Some(call_id),
            description: offer,
        });
        self.offer_deadline = Some(Instant::now() + self.config.offer_timeout);

        self.publish_status();
        self.emit(CallEvent::OfferSent { call_id });
        Ok(())
    }

    async fn on_offer(&mut self, call_id: Option<CallId>, description: SessionDescription) {
        if let Some(session) = &self.session {
            warn!(
                "Dropping offer while call {} is {}",
                session.id(),
                session.state().name()
            );
            return;
        }

        let call_id = match call_id.or(self.announced.take()) {
            Some(call_id) => call_id,
            None => {
                let call_id = CallId::generate();
                warn!("Offer carried no call id, using {}", call_id);
                call_id
            }
        };
        info!("Incoming call {}", call_id);
        self.session = Some(CallSession::new(call_id, CallRole::Callee));

        if let Err(e) = self.accept_offer(call_id, description).await {
            warn!("Cannot accept offer for call {}: {}", call_id, e);
            self.teardown(EndReason::Failed(e.to_string()), false).await;
        }
    }

    async fn accept_offer(&mut self, call_id: CallId, description: SessionDescription) -> Result<()> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let engine = self.engines.open(events_tx).await?;
        self.engine_events = Some(events_rx);

        let session = self.session_mut()?;
        session.attach_engine(engine);
        session
            .engine()?
            .set_remote_description(description.clone())
            .await?;
        session.set_remote_description(description)?;
        session.transition_to(CallState::IncomingOffer)?;

        self.chunk_relay.bind(call_id);
        self.incoming_deadline = Some(Instant::now() + self.config.incoming_timeout);

        self.publish_status();
        self.emit(CallEvent::IncomingCall { call_id });
        Ok(())
    }

    async fn answer(&mut self) -> Result<CallId> {
        let call_id = match &self.session {
            Some(session) if session.state() == CallState::IncomingOffer => *session.id(),
            Some(session) => {
                return Err(CallError::UnexpectedState(format!(
                    "Cannot answer while call {} is {}",
                    session.id(),
                    session.state().name()
                )))
            }
            None => {
                return Err(CallError::UnexpectedState(
                    "No incoming call to answer".to_string(),
                ))
            }
        };

        match self.send_answer(call_id).await {
            Ok(()) => Ok(call_id),
            Err(e) => {
                warn!("Call {} failed while answering: {}", call_id, e);
                self.teardown(EndReason::Failed(e.to_string()), true).await;
                Err(e)
            }
        }
    }

    async fn send_answer(&mut self, call_id: CallId) -> Result<()> {
        let media = self.media.acquire().await?;

        let session = self.session_mut()?;
        session.attach_media(media);
        let answer = session.engine()?.create_answer().await?;
        session
            .engine()?
            .set_local_description(answer.clone())
            .await?;
        session.set_local_description(answer.clone())?;

        signal(&self.transport, SignalingMessage::Answer {
            call_id: Some(call_id),
            description: answer,
        });
        self.incoming_deadline = None;

        self.connect(call_id).await
    }

    async fn on_answer(&mut self, call_id: Option<CallId>, description: SessionDescription) {
        let current = match &self.session {
            Some(session) if session.state() == CallState::Offering => *session.id(),
            Some(session) => {
                warn!(
                    "Dropping answer while call {} is {}",
                    session.id(),
                    session.state().name()
                );
                return;
            }
            None => {
                warn!("Dropping answer with no call in progress");
                return;
            }
        };
        if let Some(call_id) = call_id {
            if call_id != current {
                warn!("Dropping answer for call {} during call {}", call_id, current);
                return;
            }
        }

        self.offer_deadline = None;
        if let Err(e) = self.accept_answer(current, description).await {
            warn!("Cannot accept answer for call {}: {}", current, e);
            self.teardown(EndReason::Failed(e.to_string()), true).await;
        }
    }

    async fn accept_answer(&mut self, call_id: CallId, description: SessionDescription) -> Result<()> {
        let session = self.session_mut()?;
        session
            .engine()?
            .set_remote_description(description.clone())
            .await?;
        session.set_remote_description(description)?;

        self.connect(call_id).await
    }

    /// Drain early candidates, mark connected, start relaying chunks
    async fn connect(&mut self, call_id: CallId) -> Result<()> {
        let session = self.session_mut()?;
        let drained = session.drain_pending_candidates().await?;
        if drained > 0 {
            debug!("Applied {} queued candidates to call {}", drained, call_id);
        }
        session.transition_to(CallState::Connected)?;

        self.chunk_relay.start();
        info!("Call {} connected", call_id);
        self.publish_status();
        self.emit(CallEvent::Connected { call_id });
        Ok(())
    }

    async fn on_candidate(&mut self, call_id: Option<CallId>, candidate: IceCandidate) {
        let Some(session) = self.session.as_mut() else {
            debug!("Dropping candidate with no call in progress");
            return;
        };
        let current = *session.id();
        if let Some(call_id) = call_id {
            if call_id != current {
                debug!("Dropping candidate for call {} during call {}", call_id, current);
                return;
            }
        }
        if session.is_closing() {
            return;
        }

        if let Err(e) = session.add_remote_candidate(candidate).await {
            warn!("Engine rejected candidate for call {}: {}", current, e);
        }
    }

    async fn on_hangup(&mut self, call_id: Option<CallId>) {
        let Some(session) = &self.session else {
            debug!("Ignoring hangup with no call in progress");
            return;
        };
        if let Some(call_id) = call_id {
            if call_id != *session.id() {
                debug!("Ignoring hangup for call {} during call {}", call_id, session.id());
                return;
            }
        }

        info!("Peer hung up call {}", session.id());
        self.teardown(EndReason::RemoteHangup, false).await;
    }

    fn on_chunk(&mut self, chunk: MediaChunk) {
        match &self.session {
            Some(session)
                if session.state() == CallState::Connected && *session.id() == chunk.call_id =>
            {
                self.emit(CallEvent::ChunkReceived { chunk });
            }
            _ => debug!("Dropping {} chunk for call {}", chunk.kind, chunk.call_id),
        }
    }

    /// Reset to idle
    ///
    /// Safe from any state. Both deadlines are cleared unconditionally. The
    /// session is taken out before anything is released, so media and the
    /// engine are released once even when causes overlap.
    async fn teardown(&mut self, reason: EndReason, notify_peer: bool) {
        self.offer_deadline = None;
        self.incoming_deadline = None;

        let Some(mut session) = self.session.take() else {
            return;
        };
        let previous = session.state();
        if !session.begin_closing() {
            return;
        }
        let call_id = *session.id();
        self.status.send_replace(snapshot(Some(&session)));

        self.chunk_relay.stop();
        if let Some(media) = session.take_media() {
            self.media.release(media).await;
        }
        if let Some(engine) = session.take_engine() {
            if let Err(e) = engine.close().await {
                warn!("Failed to close engine for call {}: {}", call_id, e);
            }
        }
        self.engine_events = None;

        self.transport.discard_pending(call_id);
        if notify_peer {
            signal(&self.transport, SignalingMessage::Hangup {
                call_id: Some(call_id),
            });
        }
        self.announced = None;

        info!("Call {} ended: {:?}", call_id, reason);
        self.status.send_replace(CallStatus::idle());
        if previous == CallState::IncomingOffer {
            self.emit(CallEvent::IncomingCallDismissed { call_id });
        }
        self.emit(CallEvent::Ended {
            call_id,
            reason,
            duration_seconds: session.duration_seconds(),
        });
    }

    fn session_mut(&mut self) -> Result<&mut CallSession> {
        self.session
            .as_mut()
            .ok_or_else(|| CallError::UnexpectedState("No call in progress".to_string()))
    }

    fn state(&self) -> CallState {
        self.session
            .as_ref()
            .map(|session| session.state())
            .unwrap_or(CallState::Idle)
    }

    fn publish_status(&self) {
        self.status.send_replace(snapshot(self.session.as_ref()));
    }

    fn emit(&self, event: CallEvent) {
        let _ = self.events.send(event);
    }
}
