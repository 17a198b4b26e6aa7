//! Reconnecting websocket transport toward the signaling relay

use super::backoff::ReconnectPolicy;
use super::connection::{ConnectionStatus, SignalingConnection};
use super::message::SignalingMessage;
use crate::domain::shared::value_objects::CallId;
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::Result;
use futures::{sink::SinkExt, stream::StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Requests handled by the transport task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCommand {
    /// Send now, or queue until the connection opens
    Send(SignalingMessage),
    /// Drop queued messages of a torn-down call
    DiscardPending(CallId),
    /// Close the socket and stop reconnecting
    Shutdown,
}

/// Cloneable, non-blocking front of the transport task
#[derive(Debug, Clone)]
pub struct TransportHandle {
    commands: mpsc::UnboundedSender<TransportCommand>,
    status: watch::Receiver<ConnectionStatus>,
}

impl TransportHandle {
    /// Handle with no socket behind it
    ///
    /// Every command lands in the returned receiver. The status stays
    /// `Disconnected`.
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<TransportCommand>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let (_, status) = watch::channel(ConnectionStatus::Disconnected);
        (Self { commands, status }, rx)
    }

    /// Hand a message to the transport task
    ///
    /// Fails only once the task has stopped; a closed socket just queues.
    pub fn send(&self, message: SignalingMessage) -> Result<()> {
        let kind = message.kind();
        self.commands
            .send(TransportCommand::Send(message))
            .map_err(|_| {
                CallError::TransportDisconnected(format!(
                    "transport stopped, {} message dropped",
                    kind
                ))
            })
    }

    pub fn discard_pending(&self, call_id: CallId) {
        let _ = self.commands.send(TransportCommand::DiscardPending(call_id));
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(TransportCommand::Shutdown);
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Wait until the transport reports `status`
    pub async fn wait_for_status(&self, status: ConnectionStatus) -> bool {
        let mut rx = self.status.clone();
        let reached = rx.wait_for(|current| *current == status).await.is_ok();
        reached
    }
}

enum SessionEnd {
    Closed(String),
    Shutdown,
}

/// Websocket client that keeps one connection to the relay alive
///
/// Outbound messages queue while the socket is down and are flushed in
/// order as soon as a new connection opens, before any later send.
/// Inbound text frames are parsed; malformed ones are logged and dropped.
pub struct SignalingTransport {
    url: String,
    policy: ReconnectPolicy,
    connection: SignalingConnection,
    commands: mpsc::UnboundedReceiver<TransportCommand>,
    inbound: mpsc::UnboundedSender<SignalingMessage>,
    status: watch::Sender<ConnectionStatus>,
}

impl SignalingTransport {
    pub fn new(
        url: impl Into<String>,
        policy: ReconnectPolicy,
    ) -> (Self, TransportHandle, mpsc::UnboundedReceiver<SignalingMessage>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);

        let transport = Self {
            url: url.into(),
            policy,
            connection: SignalingConnection::new(),
            commands: commands_rx,
            inbound: inbound_tx,
            status: status_tx,
        };
        let handle = TransportHandle {
            commands: commands_tx,
            status: status_rx,
        };
        (transport, handle, inbound_rx)
    }

    /// Start the transport on its own task
    pub fn spawn(
        url: impl Into<String>,
        policy: ReconnectPolicy,
    ) -> (
        TransportHandle,
        mpsc::UnboundedReceiver<SignalingMessage>,
        JoinHandle<()>,
    ) {
        let (transport, handle, inbound) = Self::new(url, policy);
        let task = tokio::spawn(transport.run());
        (handle, inbound, task)
    }

    /// Connect, serve, and reconnect until shut down
    pub async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            self.set_status(ConnectionStatus::Connecting);

            match self.connect().await {
                None => break,
                Some(Ok(stream)) => {
                    info!("Connected to signaling relay {}", self.url);
                    attempt = 0;
                    self.set_status(ConnectionStatus::Open);

                    match self.serve(stream).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Closed(reason) => {
                            warn!("Signaling connection lost: {}", reason);
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!("Failed to connect to signaling relay {}: {}", self.url, e);
                }
            }

            self.set_status(ConnectionStatus::Disconnected);
            let delay = self.policy.delay(attempt);
            attempt = attempt.saturating_add(1);
            info!(
                "Reconnecting to {} in {:?} (attempt {}, {} queued)",
                self.url,
                delay,
                attempt,
                self.connection.queued()
            );

            if !self.wait_backoff(delay).await {
                break;
            }
        }

        self.set_status(ConnectionStatus::Disconnected);
        info!("Signaling transport stopped");
    }

    /// Open a socket while still accepting commands; None on shutdown
    async fn connect(
        &mut self,
    ) -> Option<std::result::Result<WsStream, tokio_tungstenite::tungstenite::Error>> {
        let connect = connect_async(self.url.clone());
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => {
                    return Some(result.map(|(stream, _response)| stream));
                }
                command = self.commands.recv() => {
                    if !self.queue_command(command) {
                        return None;
                    }
                }
            }
        }
    }

    async fn wait_backoff(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                command = self.commands.recv() => {
                    if !self.queue_command(command) {
                        return false;
                    }
                }
            }
        }
    }

    /// Handle a command while the socket is down; false means stop
    fn queue_command(&mut self, command: Option<TransportCommand>) -> bool {
        match command {
            Some(TransportCommand::Send(message)) => {
                debug!("Queued {} message while disconnected", message.kind());
                self.connection.enqueue(message);
                true
            }
            Some(TransportCommand::DiscardPending(call_id)) => {
                self.discard(&call_id);
                true
            }
            Some(TransportCommand::Shutdown) | None => false,
        }
    }

    async fn serve(&mut self, stream: WsStream) -> SessionEnd {
        let (mut sink, mut source) = stream.split();

        // Everything queued while down goes out before any new send
        while let Some(message) = self.connection.next_queued() {
            if let Err(e) = sink.send(Message::Text(message.encode())).await {
                self.connection.requeue_front(message);
                return SessionEnd::Closed(e.to_string());
            }
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(TransportCommand::Send(message)) => {
                        if let Some(message) = self.connection.send(message) {
                            if let Err(e) = sink.send(Message::Text(message.encode())).await {
                                self.connection.requeue_front(message);
                                return SessionEnd::Closed(e.to_string());
                            }
                        }
                    }
                    Some(TransportCommand::DiscardPending(call_id)) => self.discard(&call_id),
                    Some(TransportCommand::Shutdown) | None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return SessionEnd::Shutdown;
                    }
                },
                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.dispatch(&text),
                    Some(Ok(Message::Close(_))) | None => {
                        return SessionEnd::Closed("closed by relay".to_string());
                    }
                    Some(Ok(_)) => debug!("Ignoring non-text frame from relay"),
                    Some(Err(e)) => return SessionEnd::Closed(e.to_string()),
                },
            }
        }
    }

    fn dispatch(&self, text: &str) {
        match SignalingMessage::parse(text) {
            Ok(message) => {
                debug!("Received {} message from relay", message.kind());
                if self.inbound.send(message).is_err() {
                    debug!("No consumer for inbound signaling messages");
                }
            }
            Err(e) => warn!("Dropping inbound message: {}", e),
        }
    }

    fn discard(&mut self, call_id: &CallId) {
        let dropped = self.connection.discard_call(call_id);
        if dropped > 0 {
            debug!("Discarded {} queued messages of call {}", dropped, call_id);
        }
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        self.connection.set_status(status);
        self.status.send_replace(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_handle_records_commands() {
        let (handle, mut rx) = TransportHandle::detached();
        let call_id = CallId::generate();

        handle
            .send(SignalingMessage::Hangup {
                call_id: Some(call_id),
            })
            .unwrap();
        handle.discard_pending(call_id);
        handle.shutdown();

        assert!(matches!(rx.try_recv(), Ok(TransportCommand::Send(_))));
        assert_eq!(rx.try_recv(), Ok(TransportCommand::DiscardPending(call_id)));
        assert_eq!(rx.try_recv(), Ok(TransportCommand::Shutdown));
        assert_eq!(handle.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_send_after_task_stopped_fails() {
        let (handle, rx) = TransportHandle::detached();
        drop(rx);

        let result = handle.send(SignalingMessage::Hangup { call_id: None });
        assert!(matches!(result, Err(CallError::TransportDisconnected(_))));
    }

    #[tokio::test]
    async fn test_shutdown_while_unreachable() {
        // Nothing listens on port 9 of localhost
        let policy = ReconnectPolicy {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(20),
            ..ReconnectPolicy::default()
        };
        let (handle, _inbound, task) = SignalingTransport::spawn("ws://127.0.0.1:9/signaling/x", policy);

        handle.send(SignalingMessage::Hangup { call_id: None }).unwrap();
        handle.shutdown();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(handle.status(), ConnectionStatus::Disconnected);
    }
}
