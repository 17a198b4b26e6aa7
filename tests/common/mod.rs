//! Recording fakes shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use callwire::application::{CoordinatorConfig, CoordinatorHandle, NegotiationCoordinator};
use callwire::domain::call::{EngineEvent, EngineEventSender, EngineFactory, MediaDevice, NegotiationEngine};
use callwire::domain::shared::value_objects::{IceCandidate, MediaHandle, SessionDescription};
use callwire::infrastructure::signaling::{SignalingMessage, TransportCommand, TransportHandle};
use callwire::{CallError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// What a recording engine was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    CreateOffer,
    CreateAnswer,
    SetLocal(SessionDescription),
    SetRemote(SessionDescription),
    AddCandidate(String),
    Close,
}

/// Calls made to every engine a factory opened, plus their event senders
#[derive(Clone, Default)]
pub struct EngineLog {
    calls: Arc<Mutex<Vec<EngineCall>>>,
    senders: Arc<Mutex<Vec<EngineEventSender>>>,
}

impl EngineLog {
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn added_candidates(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::AddCandidate(candidate) => Some(candidate),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, expected: &EngineCall) -> usize {
        self.calls().iter().filter(|call| *call == expected).count()
    }

    pub fn opened(&self) -> usize {
        self.senders.lock().unwrap().len()
    }

    /// Raise an event on the most recently opened engine
    pub fn raise(&self, event: EngineEvent) {
        let senders = self.senders.lock().unwrap();
        let sender = senders.last().expect("no engine opened");
        sender.send(event).expect("coordinator dropped engine events");
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().unwrap().push(call);
    }
}

pub struct RecordingEngine {
    log: EngineLog,
    local_sdp: String,
}

#[async_trait]
impl NegotiationEngine for RecordingEngine {
    async fn create_offer(&self) -> Result<SessionDescription> {
        self.log.record(EngineCall::CreateOffer);
        Ok(SessionDescription::offer(self.local_sdp.clone()))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.log.record(EngineCall::CreateAnswer);
        Ok(SessionDescription::answer(self.local_sdp.clone()))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.log.record(EngineCall::SetLocal(description));
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.log.record(EngineCall::SetRemote(description));
        Ok(())
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.log.record(EngineCall::AddCandidate(candidate.candidate));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.log.record(EngineCall::Close);
        Ok(())
    }
}

pub struct RecordingFactory {
    log: EngineLog,
    local_sdp: String,
}

impl RecordingFactory {
    pub fn new(log: EngineLog, local_sdp: impl Into<String>) -> Self {
        Self {
            log,
            local_sdp: local_sdp.into(),
        }
    }
}

#[async_trait]
impl EngineFactory for RecordingFactory {
    async fn open(&self, events: EngineEventSender) -> Result<Box<dyn NegotiationEngine>> {
        self.log.senders.lock().unwrap().push(events);
        Ok(Box::new(RecordingEngine {
            log: self.log.clone(),
            local_sdp: self.local_sdp.clone(),
        }))
    }
}

/// Media device counting acquisitions and releases
#[derive(Default)]
pub struct RecordingMedia {
    acquired: AtomicUsize,
    released: AtomicUsize,
    unavailable: bool,
}

impl RecordingMedia {
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Default::default()
        }
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaDevice for RecordingMedia {
    async fn acquire(&self) -> Result<MediaHandle> {
        if self.unavailable {
            return Err(CallError::DeviceUnavailable("permission denied".to_string()));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(MediaHandle::new())
    }

    async fn release(&self, _handle: MediaHandle) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// One coordinator wired to a detached transport
pub struct Endpoint {
    pub handle: CoordinatorHandle,
    pub inbound: mpsc::UnboundedSender<SignalingMessage>,
    pub outbound: mpsc::UnboundedReceiver<TransportCommand>,
    pub engines: EngineLog,
    pub media: Arc<RecordingMedia>,
}

impl Endpoint {
    pub fn spawn(local_sdp: &str) -> Self {
        Self::spawn_with(local_sdp, RecordingMedia::default(), CoordinatorConfig::default())
    }

    pub fn spawn_with(local_sdp: &str, media: RecordingMedia, config: CoordinatorConfig) -> Self {
        let (transport, outbound) = TransportHandle::detached();
        let (inbound, inbound_rx) = mpsc::unbounded_channel();
        let engines = EngineLog::default();
        let media = Arc::new(media);

        let (handle, _task) = NegotiationCoordinator::spawn(
            config,
            transport,
            inbound_rx,
            Arc::new(RecordingFactory::new(engines.clone(), local_sdp)),
            media.clone(),
        );

        Self {
            handle,
            inbound,
            outbound,
            engines,
            media,
        }
    }

    pub fn deliver(&self, message: SignalingMessage) {
        self.inbound.send(message).expect("coordinator stopped");
    }

    /// Next message handed to the transport for sending
    pub async fn next_sent(&mut self) -> SignalingMessage {
        let wait = async {
            loop {
                match self.outbound.recv().await {
                    Some(TransportCommand::Send(message)) => return message,
                    Some(_) => continue,
                    None => panic!("transport handle dropped"),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("nothing sent")
    }

    /// Everything queued for the transport so far
    pub fn drain_outbound(&mut self) -> Vec<TransportCommand> {
        let mut commands = Vec::new();
        while let Ok(command) = self.outbound.try_recv() {
            commands.push(command);
        }
        commands
    }
}
