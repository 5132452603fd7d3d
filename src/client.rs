//! WebSocket client for the canvas server.
//!
//! Used by applications and the integration tests. Connects, joins a room,
//! and surfaces server traffic as typed [`ClientEvent`]s on an mpsc
//! channel. Commits, undo and redo are fire-and-forget: the authoritative
//! operation comes back as a `Committed` event once the coordinator has
//! appended it. There is no retry or offline queueing here — resubmitting
//! after a drop is the application's decision.

use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::oplog::{Operation, StrokePayload};
use crate::presence::{LiveMessage, Vec2};
use crate::protocol::{MessageType, ParticipantInfo, ProtocolError, WireMessage};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the canvas client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Connection established and join sent
    Connected,
    /// Connection lost
    Disconnected,
    /// Join accepted: our identity, the visible strokes, the roster
    Welcome {
        participant: ParticipantInfo,
        history: Vec<Operation>,
        participants: Vec<ParticipantInfo>,
    },
    /// A committed operation, in the coordinator's order
    Committed(Operation),
    /// The room roster changed
    Participants(Vec<ParticipantInfo>),
    /// A live preview or cursor from another participant
    Live(LiveMessage),
    /// The server rejected a request
    Rejected(String),
}

/// The canvas client.
pub struct CanvasClient {
    display_name: String,
    room_id: String,
    server_url: String,
    state: Arc<RwLock<ConnectionState>>,
    /// Set once the Welcome arrives.
    participant: Arc<RwLock<Option<ParticipantInfo>>>,
    outgoing_tx: Option<mpsc::Sender<Vec<u8>>>,
    event_rx: Option<mpsc::Receiver<ClientEvent>>,
    event_tx: mpsc::Sender<ClientEvent>,
    /// Counter for outgoing cursor timestamps.
    cursor_clock: Arc<RwLock<u64>>,
}

impl CanvasClient {
    pub fn new(
        display_name: impl Into<String>,
        room_id: impl Into<String>,
        server_url: impl Into<String>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            display_name: display_name.into(),
            room_id: room_id.into(),
            server_url: server_url.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            participant: Arc::new(RwLock::new(None)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
            cursor_clock: Arc::new(RwLock::new(0)),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    /// Connect to the server and join the room.
    ///
    /// Spawns background tasks for the WebSocket reader and writer.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.server_url)
            .await
            .map_err(|_| {
                // Connection refused and handshake failures land here
                ProtocolError::ConnectionClosed
            })?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
        self.outgoing_tx = Some(out_tx);

        // Writer task: drain the outgoing channel into the socket. The
        // channel closing (disconnect or client drop) sends a Close frame
        // so the server processes the leave promptly.
        tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer
                    .send(tokio_tungstenite::tungstenite::Message::Binary(data.into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            let _ = ws_writer
                .send(tokio_tungstenite::tungstenite::Message::Close(None))
                .await;
        });

        // Join must be the first frame on the connection
        let join = WireMessage::join(&self.room_id, &self.display_name)?;
        self.send(join).await?;

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(ClientEvent::Connected).await;

        // Reader task: map incoming frames to events
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let participant = self.participant.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(tokio_tungstenite::tungstenite::Message::Binary(data)) => {
                        let bytes: Vec<u8> = data.into();
                        let Ok(wire) = WireMessage::decode(&bytes) else {
                            log::warn!("undecodable frame from server");
                            continue;
                        };
                        let event = match wire.msg_type {
                            MessageType::Welcome => match wire.welcome_payload() {
                                Ok(payload) => {
                                    *participant.write().await = Some(payload.participant.clone());
                                    Some(ClientEvent::Welcome {
                                        participant: payload.participant,
                                        history: payload.history,
                                        participants: payload.participants,
                                    })
                                }
                                Err(_) => None,
                            },
                            MessageType::Committed => {
                                wire.operation().ok().map(ClientEvent::Committed)
                            }
                            MessageType::Participants => {
                                wire.participant_list().ok().map(ClientEvent::Participants)
                            }
                            MessageType::Preview | MessageType::Cursor => {
                                wire.live_message().ok().map(ClientEvent::Live)
                            }
                            MessageType::Reject => {
                                wire.reject_reason().ok().map(ClientEvent::Rejected)
                            }
                            _ => None,
                        };
                        if let Some(evt) = event {
                            let _ = event_tx.send(evt).await;
                        }
                    }
                    Ok(tokio_tungstenite::tungstenite::Message::Close(_)) | Err(_) => {
                        break;
                    }
                    _ => {}
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(ClientEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Submit a completed stroke for commit.
    pub async fn commit_stroke(&self, payload: StrokePayload) -> Result<(), ProtocolError> {
        let author = self.author_id().await;
        self.send(WireMessage::commit_stroke(&self.room_id, author, &payload)?)
            .await
    }

    /// Request an undo of our most recent visible stroke.
    pub async fn undo(&self) -> Result<(), ProtocolError> {
        let author = self.author_id().await;
        self.send(WireMessage::undo(&self.room_id, author)).await
    }

    /// Request a redo of our most recently undone stroke.
    pub async fn redo(&self) -> Result<(), ProtocolError> {
        let author = self.author_id().await;
        self.send(WireMessage::redo(&self.room_id, author)).await
    }

    /// Send a live preview of a stroke in progress (advisory).
    pub async fn send_preview(&self, segment: StrokePayload) -> Result<(), ProtocolError> {
        let author = self.author_id().await;
        let live = LiveMessage::preview(author, segment);
        self.send(WireMessage::live(&self.room_id, &live)?).await
    }

    /// Send a cursor position (advisory). Throttling is the caller's
    /// business — see `presence::CursorThrottle`.
    pub async fn send_cursor(&self, position: Vec2) -> Result<(), ProtocolError> {
        let author = self.author_id().await;
        let timestamp = {
            let mut clock = self.cursor_clock.write().await;
            *clock += 1;
            *clock
        };
        let live = LiveMessage::cursor(author, position, timestamp);
        self.send(WireMessage::live(&self.room_id, &live)?).await
    }

    /// Close the connection. The server processes this as a leave.
    pub async fn disconnect(&mut self) {
        // Dropping the sender ends the writer task, which sends Close
        self.outgoing_tx = None;
        *self.state.write().await = ConnectionState::Disconnected;
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Our server-assigned identity, once the Welcome has arrived.
    pub async fn participant(&self) -> Option<ParticipantInfo> {
        self.participant.read().await.clone()
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    async fn author_id(&self) -> Uuid {
        self.participant
            .read()
            .await
            .as_ref()
            .map(|p| p.id)
            // The server re-stamps authorship anyway
            .unwrap_or_else(Uuid::nil)
    }

    async fn send(&self, msg: WireMessage) -> Result<(), ProtocolError> {
        let encoded = msg.encode()?;
        match &self.outgoing_tx {
            Some(tx) => tx
                .send(encoded)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = CanvasClient::new("Alice", "lobby", "ws://localhost:9090");
        assert_eq!(client.display_name(), "Alice");
        assert_eq!(client.room_id(), "lobby");
        assert_eq!(client.server_url(), "ws://localhost:9090");
    }

    #[tokio::test]
    async fn test_client_initial_state() {
        let client = CanvasClient::new("Alice", "lobby", "ws://localhost:9090");
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
        assert!(client.participant().await.is_none());
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let client = CanvasClient::new("Alice", "lobby", "ws://localhost:9090");
        let result = client.undo().await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_take_event_rx_once() {
        let mut client = CanvasClient::new("Alice", "lobby", "ws://localhost:9090");
        assert!(client.take_event_rx().is_some());
        assert!(client.take_event_rx().is_none());
    }
}
