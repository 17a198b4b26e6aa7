//! Websocket signaling relay
//!
//! Peers that join the same room see each other's signaling messages. Each
//! valid text frame from one connection is forwarded, unchanged and in
//! arrival order, to every other connection in the room.
//!
//! Every member owns a bounded queue. A full queue makes the publishing
//! connection wait rather than lose frames. A member still full after
//! `STALL_LIMIT` is evicted and its socket closed, so its client reconnects.

use crate::infrastructure::signaling::SignalingMessage;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How long a publisher waits on one member's full queue
pub const STALL_LIMIT: Duration = Duration::from_secs(10);

type Members = HashMap<Uuid, mpsc::Sender<String>>;

/// Relay rooms (room name -> member queues)
pub struct RelayState {
    rooms: RwLock<HashMap<String, Members>>,
    member_queue: usize,
}

impl RelayState {
    pub fn new(member_queue: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            member_queue: member_queue.max(1),
        }
    }

    /// Join a room, creating it on first use
    pub async fn join(&self, room: &str, member: Uuid) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(self.member_queue);
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room.to_string())
            .or_insert_with(|| {
                info!("Opening relay room {}", room);
                HashMap::new()
            })
            .insert(member, tx);
        rx
    }

    /// Remove a member; the room closes with its last member
    pub async fn leave(&self, room: &str, member: &Uuid) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(room) {
            members.remove(member);
            if members.is_empty() {
                rooms.remove(room);
                info!("Closed relay room {}", room);
            }
        }
    }

    /// Queue `text` for every member of `room` except `from`
    ///
    /// Waits while a recipient's queue is full. Returns the number of
    /// members the frame was queued for.
    pub async fn publish(&self, room: &str, from: &Uuid, text: &str) -> usize {
        let recipients: Vec<(Uuid, mpsc::Sender<String>)> = {
            let rooms = self.rooms.read().await;
            match rooms.get(room) {
                Some(members) => members
                    .iter()
                    .filter(|(id, _)| *id != from)
                    .map(|(id, tx)| (*id, tx.clone()))
                    .collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for (member, tx) in recipients {
            match tx.send_timeout(text.to_string(), STALL_LIMIT).await {
                Ok(()) => delivered += 1,
                Err(SendTimeoutError::Timeout(_)) => {
                    warn!("Member {} of room {} stalled, evicting it", member, room);
                    self.leave(room, &member).await;
                }
                Err(SendTimeoutError::Closed(_)) => {
                    debug!("Member {} already left room {}", member, room);
                }
            }
        }
        delivered
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn members(&self, room: &str) -> usize {
        self.rooms
            .read()
            .await
            .get(room)
            .map(|members| members.len())
            .unwrap_or(0)
    }
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new(64)
    }
}

/// WebSocket handler for a relay room
pub async fn relay_handler(
    ws: WebSocketUpgrade,
    Path(room): Path<String>,
    State(state): State<Arc<RelayState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, room, state))
}

async fn handle_socket(socket: WebSocket, room: String, state: Arc<RelayState>) {
    let connection_id = Uuid::new_v4();
    let mut queue = state.join(&room, connection_id).await;
    info!("Connection {} joined room {}", connection_id, room);

    let (mut sender, mut receiver) = socket.split();

    // Frames from the other members of the room; ends on eviction
    let mut send_task = tokio::spawn(async move {
        while let Some(text) = queue.recv().await {
            if sender.send(Message::Text(text)).await.is_err() {
                return;
            }
        }
        let _ = sender.close().await;
    });

    // Frames from this connection
    let room_name = room.clone();
    let relay = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) => match SignalingMessage::parse(&text) {
                    Ok(message) => {
                        let delivered = relay.publish(&room_name, &connection_id, &text).await;
                        debug!(
                            "Relayed {} message from {} to {} members of {}",
                            message.kind(),
                            connection_id,
                            delivered,
                            room_name
                        );
                    }
                    Err(e) => warn!("Dropping message from {}: {}", connection_id, e),
                },
                Ok(Message::Close(_)) => {
                    debug!("Connection {} sent close", connection_id);
                    break;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(Message::Binary(_)) => {
                    warn!("Dropping binary frame from {}", connection_id);
                }
                Err(e) => {
                    error!("WebSocket error for {}: {}", connection_id, e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    let _ = send_task.await;
    let _ = recv_task.await;

    state.leave(&room, &connection_id).await;
    info!("Connection {} left room {}", connection_id, room);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_creates_room() {
        let state = RelayState::new(8);
        let _queue = state.join("lobby", Uuid::new_v4()).await;

        assert_eq!(state.room_count().await, 1);
        assert_eq!(state.members("lobby").await, 1);
    }

    #[tokio::test]
    async fn test_leave_keeps_room_with_members() {
        let state = RelayState::new(8);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let _queue_a = state.join("lobby", a).await;
        let _queue_b = state.join("lobby", b).await;

        state.leave("lobby", &a).await;
        assert_eq!(state.room_count().await, 1);
        assert_eq!(state.members("lobby").await, 1);
    }

    #[tokio::test]
    async fn test_leave_removes_empty_room() {
        let state = RelayState::new(8);
        let member = Uuid::new_v4();
        let _queue = state.join("lobby", member).await;

        state.leave("lobby", &member).await;
        assert_eq!(state.room_count().await, 0);
        assert_eq!(state.members("lobby").await, 0);
    }

    #[tokio::test]
    async fn test_publish_skips_sender_and_keeps_order() {
        let state = RelayState::new(8);
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut queue_a = state.join("lobby", a).await;
        let mut queue_b = state.join("lobby", b).await;
        let mut queue_c = state.join("lobby", c).await;

        assert_eq!(state.publish("lobby", &a, "one").await, 2);
        assert_eq!(state.publish("lobby", &a, "two").await, 2);

        for queue in [&mut queue_b, &mut queue_c] {
            assert_eq!(queue.recv().await.as_deref(), Some("one"));
            assert_eq!(queue.recv().await.as_deref(), Some("two"));
        }
        assert!(queue_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let state = RelayState::new(8);
        let a = Uuid::new_v4();
        let _queue_a = state.join("a", a).await;
        let mut queue_b = state.join("b", Uuid::new_v4()).await;

        assert_eq!(state.publish("a", &a, "{}").await, 0);
        assert!(queue_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_waits_instead_of_dropping() {
        let state = Arc::new(RelayState::new(1));
        let a = Uuid::new_v4();
        let _queue_a = state.join("lobby", a).await;
        let mut queue_b = state.join("lobby", Uuid::new_v4()).await;

        assert_eq!(state.publish("lobby", &a, "one").await, 1);
        let publisher = state.clone();
        let second = tokio::spawn(async move { publisher.publish("lobby", &a, "two").await });

        tokio::task::yield_now().await;
        assert!(!second.is_finished());

        assert_eq!(queue_b.recv().await.as_deref(), Some("one"));
        assert_eq!(second.await.unwrap(), 1);
        assert_eq!(queue_b.recv().await.as_deref(), Some("two"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_member_is_evicted() {
        let state = RelayState::new(1);
        let a = Uuid::new_v4();
        let _queue_a = state.join("lobby", a).await;
        let mut queue_b = state.join("lobby", Uuid::new_v4()).await;

        assert_eq!(state.publish("lobby", &a, "one").await, 1);
        assert_eq!(state.publish("lobby", &a, "two").await, 0);
        assert_eq!(state.members("lobby").await, 1);

        // The evicted member drains what it had, then sees its queue closed
        assert_eq!(queue_b.recv().await.as_deref(), Some("one"));
        assert_eq!(queue_b.recv().await, None);
    }
}
