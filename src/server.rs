//! WebSocket canvas server with room-based routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── Room (room_id) ── Mutex<RoomState> ── BroadcastGroup
//! Client B ──┘         │                                    │
//!                      │ (operation log is ground truth)    │
//!                      ▼                                    ▼
//!               append + undo index                  Client A, B, C…
//! ```
//!
//! Per connection: the first frame must be `Join`; once admitted, commits
//! and undo/redo go through the room's serialization point and the
//! committed operation is fanned out to every member in the coordinator's
//! order. Previews and cursors are relayed as-is without touching the log,
//! with the envelope author re-stamped to the connection identity so a
//! client cannot impersonate another author.

use std::net::SocketAddr;
use std::sync::Arc;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::protocol::{MessageType, WelcomePayload, WireMessage};
use crate::registry::{RoomHandle, SessionRegistry};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum participants per room
    pub max_participants_per_room: usize,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            max_participants_per_room: 100,
            broadcast_capacity: 256,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
}

type WsSender = SplitSink<WebSocketStream<TcpStream>, Message>;
type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The room this connection currently belongs to.
struct Membership {
    room_id: String,
    room: Arc<RoomHandle>,
}

/// The canvas server.
pub struct CanvasServer {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    stats: Arc<RwLock<ServerStats>>,
}

impl CanvasServer {
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(SessionRegistry::with_room_limit(
            config.broadcast_capacity,
            config.max_participants_per_room,
        ));
        Self {
            config,
            registry,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Start listening for WebSocket connections.
    ///
    /// Runs the accept loop; call from an async runtime.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("canvas server listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("new TCP connection from {addr}");

            let registry = self.registry.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, registry, stats).await {
                    log::error!("connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    ///
    /// Socket errors inside the loop break out rather than returning, so
    /// the departure cleanup after the loop always runs.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        registry: Arc<SessionRegistry>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let connection_id = Uuid::new_v4();
        log::info!("websocket connection {connection_id} established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let mut membership: Option<Membership> = None;
        let mut broadcast_rx: Option<tokio::sync::broadcast::Receiver<Arc<Vec<u8>>>> = None;

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            let wire = match WireMessage::decode(&bytes) {
                                Ok(wire) => wire,
                                Err(e) => {
                                    log::warn!("undecodable frame from {connection_id}: {e}");
                                    continue;
                                }
                            };

                            {
                                let mut s = stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += bytes.len() as u64;
                            }

                            match wire.msg_type {
                                MessageType::Join => {
                                    if let Err(e) = Self::handle_join(
                                        &wire,
                                        connection_id,
                                        &registry,
                                        &mut ws_sender,
                                        &mut membership,
                                        &mut broadcast_rx,
                                    )
                                    .await
                                    {
                                        log::error!("join handling failed for {connection_id}: {e}");
                                        break;
                                    }
                                    let mut s = stats.write().await;
                                    s.active_rooms = registry.room_count().await;
                                }

                                MessageType::CommitStroke => {
                                    let Some(m) = membership.as_ref() else {
                                        if send_reject(&mut ws_sender, &wire.room_id, "join required").await.is_err() {
                                            break;
                                        }
                                        continue;
                                    };
                                    let payload = match wire.stroke_payload() {
                                        Ok(p) => p,
                                        Err(e) => {
                                            if send_reject(&mut ws_sender, &m.room_id, &e.to_string()).await.is_err() {
                                                break;
                                            }
                                            continue;
                                        }
                                    };
                                    match registry.commit_stroke(&m.room_id, connection_id, payload).await {
                                        Ok(op) => {
                                            // Broadcast after the mutation returned,
                                            // using the committed operation
                                            match WireMessage::committed(&op).and_then(|f| f.encode()) {
                                                Ok(frame) => {
                                                    m.room.broadcast.send(Arc::new(frame));
                                                }
                                                Err(e) => log::error!("encoding committed operation failed: {e}"),
                                            }
                                        }
                                        Err(e) => {
                                            log::warn!("stroke from {connection_id} rejected: {e}");
                                            if send_reject(&mut ws_sender, &m.room_id, &e.to_string()).await.is_err() {
                                                break;
                                            }
                                        }
                                    }
                                }

                                MessageType::Undo | MessageType::Redo => {
                                    let Some(m) = membership.as_ref() else {
                                        if send_reject(&mut ws_sender, &wire.room_id, "join required").await.is_err() {
                                            break;
                                        }
                                        continue;
                                    };
                                    let result = if wire.msg_type == MessageType::Undo {
                                        registry.undo(&m.room_id, connection_id).await
                                    } else {
                                        registry.redo(&m.room_id, connection_id).await
                                    };
                                    match result {
                                        // No-op: nothing appended, nothing broadcast
                                        Ok(None) => {}
                                        Ok(Some(op)) => {
                                            match WireMessage::committed(&op).and_then(|f| f.encode()) {
                                                Ok(frame) => {
                                                    m.room.broadcast.send(Arc::new(frame));
                                                }
                                                Err(e) => log::error!("encoding committed operation failed: {e}"),
                                            }
                                        }
                                        Err(e) => {
                                            if send_reject(&mut ws_sender, &m.room_id, &e.to_string()).await.is_err() {
                                                break;
                                            }
                                        }
                                    }
                                }

                                MessageType::Preview | MessageType::Cursor => {
                                    // Advisory traffic: bypasses the coordinator,
                                    // dropped silently when not joined
                                    let Some(m) = membership.as_ref() else {
                                        log::debug!("live frame from unjoined {connection_id} dropped");
                                        continue;
                                    };
                                    // Connections cannot speak for other authors:
                                    // the payload is re-stamped, not just the
                                    // envelope, since clients render the payload
                                    let live = match wire.live_message() {
                                        Ok(live) => live.with_author(connection_id),
                                        Err(e) => {
                                            log::debug!("malformed live frame from {connection_id}: {e}");
                                            continue;
                                        }
                                    };
                                    match WireMessage::live(&m.room_id, &live).and_then(|f| f.encode()) {
                                        Ok(frame) => {
                                            m.room.broadcast.send(Arc::new(frame));
                                        }
                                        Err(e) => log::error!("encoding live frame failed: {e}"),
                                    }
                                }

                                // Server-to-client types arriving here are client bugs
                                other => {
                                    log::debug!("ignoring unexpected {other:?} frame from {connection_id}");
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("connection {connection_id} closed");
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            if ws_sender.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }

                        Some(Err(e)) => {
                            log::error!("websocket error from {connection_id}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                frame = async {
                    match &mut broadcast_rx {
                        Some(rx) => rx.recv().await,
                        // Not in a room yet — wait forever
                        None => std::future::pending().await,
                    }
                } => {
                    match frame {
                        Ok(frame) => {
                            // Don't echo a connection's own advisory traffic;
                            // committed operations go back to their author so
                            // the client learns the assigned id and timestamp
                            if let Ok(wire) = WireMessage::decode(&frame) {
                                let own_live = wire.author_id == connection_id
                                    && matches!(wire.msg_type, MessageType::Preview | MessageType::Cursor);
                                if own_live {
                                    continue;
                                }
                            }
                            if ws_sender.send(Message::Binary(frame.to_vec().into())).await.is_err() {
                                log::info!("connection {connection_id} unwritable, dropping it");
                                break;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("connection {connection_id} lagged by {n} frames");
                        }
                        Err(_) => break,
                    }
                }
            }
        }

        // Cleanup: exactly one leave per connection
        if let Some(m) = membership.take() {
            Self::depart(&registry, &m, connection_id).await;
        }

        {
            let mut s = stats.write().await;
            s.active_connections -= 1;
            s.active_rooms = registry.room_count().await;
        }

        Ok(())
    }

    async fn handle_join(
        wire: &WireMessage,
        connection_id: Uuid,
        registry: &Arc<SessionRegistry>,
        ws_sender: &mut WsSender,
        membership: &mut Option<Membership>,
        broadcast_rx: &mut Option<tokio::sync::broadcast::Receiver<Arc<Vec<u8>>>>,
    ) -> Result<(), BoxError> {
        let request = match wire.join_request() {
            Ok(r) => r,
            Err(e) => {
                send_reject(ws_sender, &wire.room_id, &e.to_string()).await?;
                return Ok(());
            }
        };

        // Switching rooms leaves the old one first
        if let Some(old) = membership.take() {
            *broadcast_rx = None;
            Self::depart(registry, &old, connection_id).await;
        }

        // The registry enforces the room capacity under the room lock
        let admission = match registry
            .join(&wire.room_id, connection_id, &request.display_name)
            .await
        {
            Ok(admission) => admission,
            Err(e) => {
                send_reject(ws_sender, &wire.room_id, &e.to_string()).await?;
                return Ok(());
            }
        };

        let welcome = WireMessage::welcome(
            &wire.room_id,
            &WelcomePayload {
                participant: admission.participant.clone(),
                history: admission.history,
                participants: admission.participants.clone(),
            },
        )?;
        ws_sender.send(Message::Binary(welcome.encode()?.into())).await?;

        // Everyone else learns the new roster
        let roster = WireMessage::participants(&wire.room_id, &admission.participants)?;
        admission.room.broadcast.send(Arc::new(roster.encode()?));

        *broadcast_rx = Some(admission.receiver);
        *membership = Some(Membership {
            room_id: wire.room_id.clone(),
            room: admission.room,
        });

        log::info!(
            "participant {} ({connection_id}) admitted to room {}",
            request.display_name,
            wire.room_id
        );
        Ok(())
    }

    /// Leave a room and rebroadcast the roster if the room survives.
    async fn depart(registry: &Arc<SessionRegistry>, m: &Membership, connection_id: Uuid) {
        match registry.leave(&m.room_id, connection_id).await {
            Ok(Some(departure)) if !departure.room_closed => {
                if let Ok(roster) = WireMessage::participants(&m.room_id, &departure.remaining) {
                    if let Ok(frame) = roster.encode() {
                        m.room.broadcast.send(Arc::new(frame));
                    }
                }
            }
            Ok(_) => {}
            Err(e) => log::warn!("leave for {connection_id} failed: {e}"),
        }
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }
}

async fn send_reject(ws_sender: &mut WsSender, room_id: &str, reason: &str) -> Result<(), BoxError> {
    let msg = WireMessage::reject(room_id, reason)?;
    ws_sender.send(Message::Binary(msg.encode()?.into())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.max_participants_per_room, 100);
        assert_eq!(config.broadcast_capacity, 256);
    }

    #[test]
    fn test_server_creation() {
        let server = CanvasServer::with_defaults();
        assert_eq!(server.bind_addr(), "127.0.0.1:9090");
    }

    #[test]
    fn test_server_custom_config() {
        let config = ServerConfig {
            bind_addr: "0.0.0.0:8080".to_string(),
            max_participants_per_room: 8,
            broadcast_capacity: 512,
        };
        let server = CanvasServer::new(config);
        assert_eq!(server.bind_addr(), "0.0.0.0:8080");
    }

    #[tokio::test]
    async fn test_server_stats_initial() {
        let server = CanvasServer::with_defaults();
        let stats = server.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_messages, 0);
        assert_eq!(stats.total_bytes, 0);
        assert_eq!(stats.active_rooms, 0);
    }

    #[tokio::test]
    async fn test_registry_starts_empty() {
        let server = CanvasServer::with_defaults();
        assert_eq!(server.registry().room_count().await, 0);
    }
}
