//! Binary wire protocol between clients and the canvas server.
//!
//! Every frame is a bincode-encoded [`WireMessage`] envelope:
//!
//! ```text
//! ┌──────────┬──────────┬───────────┬──────────┐
//! │ msg_type │ room_id  │ author_id │ payload  │
//! │ 1 byte   │ variable │ 16 bytes  │ variable │
//! └──────────┴──────────┴───────────┴──────────┘
//! ```
//!
//! The payload is itself bincode, typed per message: a [`StrokePayload`]
//! for commits, an [`Operation`] for broadcasts, a [`WelcomePayload`] for
//! the join response, a `LiveMessage` for previews and cursors.
//!
//! The server attributes every request to the connection that sent it; the
//! `author_id` a client writes into its own frames is advisory and gets
//! re-stamped server-side.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::oplog::{Operation, StrokePayload};
use crate::presence::{LiveMessage, ParticipantColor};

/// Message types on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Client → server: enter a room. Must be the first frame on a
    /// connection; anything else before it is rejected.
    Join = 1,
    /// Client → server: submit a completed stroke.
    CommitStroke = 2,
    /// Client → server: undo the sender's most recent visible stroke.
    Undo = 3,
    /// Client → server: redo the sender's most recently undone stroke.
    Redo = 4,
    /// Either direction: live stroke preview (advisory, droppable).
    Preview = 5,
    /// Either direction: cursor position (advisory, droppable).
    Cursor = 6,
    /// Server → client: join response with identity, history, roster.
    Welcome = 7,
    /// Server → client: a committed operation, in log order.
    Committed = 8,
    /// Server → client: the room's participant list changed.
    Participants = 9,
    /// Server → client: a request was rejected.
    Reject = 10,
}

/// Participant identity with display metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    /// The connection id — doubles as the author id on operations.
    pub id: Uuid,
    pub name: String,
    pub color: ParticipantColor,
}

impl ParticipantInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), name)
    }

    /// Create with an explicit connection id. The color is a deterministic
    /// function of the id, so every process derives the same one.
    pub fn with_id(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            color: ParticipantColor::from_uuid(id),
        }
    }
}

/// Payload of a `Join` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub display_name: String,
}

/// Payload of a `Welcome` frame: everything a late joiner needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WelcomePayload {
    /// The identity the server assigned to this connection.
    pub participant: ParticipantInfo,
    /// The currently visible strokes, reconstructed purely from the log.
    pub history: Vec<Operation>,
    /// Everyone in the room, the new joiner included.
    pub participants: Vec<ParticipantInfo>,
}

/// Top-level wire envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub msg_type: MessageType,
    pub room_id: String,
    pub author_id: Uuid,
    pub payload: Vec<u8>,
}

impl WireMessage {
    fn with_payload<T: Serialize>(
        msg_type: MessageType,
        room_id: impl Into<String>,
        author_id: Uuid,
        payload: &T,
    ) -> Result<Self, ProtocolError> {
        let payload = bincode::serde::encode_to_vec(payload, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        Ok(Self {
            msg_type,
            room_id: room_id.into(),
            author_id,
            payload,
        })
    }

    fn parse_payload<T: for<'de> Deserialize<'de>>(
        &self,
        expected: MessageType,
    ) -> Result<T, ProtocolError> {
        if self.msg_type != expected {
            return Err(ProtocolError::InvalidMessageType);
        }
        let (value, _) =
            bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
                .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(value)
    }

    /// Build a `Join` frame. The author id is nil — the server assigns the
    /// connection identity in its `Welcome` response.
    pub fn join(room_id: impl Into<String>, display_name: &str) -> Result<Self, ProtocolError> {
        Self::with_payload(
            MessageType::Join,
            room_id,
            Uuid::nil(),
            &JoinRequest {
                display_name: display_name.to_string(),
            },
        )
    }

    pub fn commit_stroke(
        room_id: impl Into<String>,
        author_id: Uuid,
        payload: &StrokePayload,
    ) -> Result<Self, ProtocolError> {
        Self::with_payload(MessageType::CommitStroke, room_id, author_id, payload)
    }

    pub fn undo(room_id: impl Into<String>, author_id: Uuid) -> Self {
        Self {
            msg_type: MessageType::Undo,
            room_id: room_id.into(),
            author_id,
            payload: Vec::new(),
        }
    }

    pub fn redo(room_id: impl Into<String>, author_id: Uuid) -> Self {
        Self {
            msg_type: MessageType::Redo,
            room_id: room_id.into(),
            author_id,
            payload: Vec::new(),
        }
    }

    /// Wrap a live preview/cursor message; the variant picks the type.
    pub fn live(room_id: impl Into<String>, msg: &LiveMessage) -> Result<Self, ProtocolError> {
        let msg_type = match msg {
            LiveMessage::Preview { .. } => MessageType::Preview,
            LiveMessage::Cursor { .. } => MessageType::Cursor,
        };
        Self::with_payload(msg_type, room_id, msg.author_id(), msg)
    }

    pub fn welcome(
        room_id: impl Into<String>,
        payload: &WelcomePayload,
    ) -> Result<Self, ProtocolError> {
        let author_id = payload.participant.id;
        Self::with_payload(MessageType::Welcome, room_id, author_id, payload)
    }

    pub fn committed(op: &Operation) -> Result<Self, ProtocolError> {
        Self::with_payload(MessageType::Committed, op.room_id.clone(), op.author_id, op)
    }

    pub fn participants(
        room_id: impl Into<String>,
        list: &[ParticipantInfo],
    ) -> Result<Self, ProtocolError> {
        Self::with_payload(MessageType::Participants, room_id, Uuid::nil(), &list.to_vec())
    }

    pub fn reject(room_id: impl Into<String>, reason: &str) -> Result<Self, ProtocolError> {
        Self::with_payload(MessageType::Reject, room_id, Uuid::nil(), &reason.to_string())
    }

    // ── typed payload accessors ─────────────────────────────────────

    pub fn join_request(&self) -> Result<JoinRequest, ProtocolError> {
        self.parse_payload(MessageType::Join)
    }

    pub fn stroke_payload(&self) -> Result<StrokePayload, ProtocolError> {
        self.parse_payload(MessageType::CommitStroke)
    }

    pub fn live_message(&self) -> Result<LiveMessage, ProtocolError> {
        match self.msg_type {
            MessageType::Preview | MessageType::Cursor => {
                let (msg, _) =
                    bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
                        .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
                Ok(msg)
            }
            _ => Err(ProtocolError::InvalidMessageType),
        }
    }

    pub fn welcome_payload(&self) -> Result<WelcomePayload, ProtocolError> {
        self.parse_payload(MessageType::Welcome)
    }

    pub fn operation(&self) -> Result<Operation, ProtocolError> {
        self.parse_payload(MessageType::Committed)
    }

    pub fn participant_list(&self) -> Result<Vec<ParticipantInfo>, ProtocolError> {
        self.parse_payload(MessageType::Participants)
    }

    pub fn reject_reason(&self) -> Result<String, ProtocolError> {
        self.parse_payload(MessageType::Reject)
    }

    /// Serialize to the binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from the binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(msg)
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    Serialization(String),
    Deserialization(String),
    InvalidMessageType,
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialization(e) => write!(f, "serialization error: {e}"),
            Self::Deserialization(e) => write!(f, "deserialization error: {e}"),
            Self::InvalidMessageType => write!(f, "invalid message type"),
            Self::ConnectionClosed => write!(f, "connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oplog::{OpKind, OperationLog, Point, ToolKind};
    use crate::presence::Vec2;

    fn stroke() -> StrokePayload {
        StrokePayload::new(
            vec![Point::new(1.0, 1.0), Point::new(2.0, 2.0)],
            [0.0, 0.0, 0.0, 1.0],
            2.0,
            ToolKind::Pen,
        )
    }

    #[test]
    fn test_join_roundtrip() {
        let msg = WireMessage::join("lobby", "Alice").unwrap();
        let decoded = WireMessage::decode(&msg.encode().unwrap()).unwrap();

        assert_eq!(decoded.msg_type, MessageType::Join);
        assert_eq!(decoded.room_id, "lobby");
        assert_eq!(decoded.author_id, Uuid::nil());
        assert_eq!(decoded.join_request().unwrap().display_name, "Alice");
    }

    #[test]
    fn test_commit_stroke_roundtrip() {
        let author = Uuid::new_v4();
        let payload = stroke();
        let msg = WireMessage::commit_stroke("lobby", author, &payload).unwrap();
        let decoded = WireMessage::decode(&msg.encode().unwrap()).unwrap();

        assert_eq!(decoded.msg_type, MessageType::CommitStroke);
        assert_eq!(decoded.author_id, author);
        assert_eq!(decoded.stroke_payload().unwrap(), payload);
    }

    #[test]
    fn test_undo_redo_frames_are_empty_payload() {
        let author = Uuid::new_v4();
        let undo = WireMessage::undo("lobby", author);
        let redo = WireMessage::redo("lobby", author);
        assert!(undo.payload.is_empty());
        assert!(redo.payload.is_empty());
        assert_eq!(undo.msg_type, MessageType::Undo);
        assert_eq!(redo.msg_type, MessageType::Redo);
    }

    #[test]
    fn test_committed_roundtrip() {
        let mut log = OperationLog::new("lobby");
        let op = log.append(Uuid::new_v4(), OpKind::Stroke(stroke()));

        let msg = WireMessage::committed(&op).unwrap();
        let decoded = WireMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded.operation().unwrap(), op);
        assert_eq!(decoded.author_id, op.author_id);
    }

    #[test]
    fn test_welcome_roundtrip() {
        let participant = ParticipantInfo::new("Alice");
        let mut log = OperationLog::new("lobby");
        let op = log.append(participant.id, OpKind::Stroke(stroke()));

        let payload = WelcomePayload {
            participant: participant.clone(),
            history: vec![op],
            participants: vec![participant.clone()],
        };
        let msg = WireMessage::welcome("lobby", &payload).unwrap();
        let decoded = WireMessage::decode(&msg.encode().unwrap()).unwrap();

        let parsed = decoded.welcome_payload().unwrap();
        assert_eq!(parsed, payload);
        assert_eq!(decoded.author_id, participant.id);
    }

    #[test]
    fn test_live_cursor_frame_type() {
        let live = LiveMessage::cursor(Uuid::new_v4(), Vec2::new(5.0, 5.0), 1);
        let msg = WireMessage::live("lobby", &live).unwrap();
        assert_eq!(msg.msg_type, MessageType::Cursor);
        assert_eq!(msg.live_message().unwrap(), live);
    }

    #[test]
    fn test_live_preview_frame_type() {
        let live = LiveMessage::preview(Uuid::new_v4(), stroke());
        let msg = WireMessage::live("lobby", &live).unwrap();
        assert_eq!(msg.msg_type, MessageType::Preview);
        assert_eq!(msg.live_message().unwrap(), live);
    }

    #[test]
    fn test_participants_roundtrip() {
        let list = vec![ParticipantInfo::new("Alice"), ParticipantInfo::new("Bob")];
        let msg = WireMessage::participants("lobby", &list).unwrap();
        let decoded = WireMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded.participant_list().unwrap(), list);
    }

    #[test]
    fn test_reject_roundtrip() {
        let msg = WireMessage::reject("lobby", "join required").unwrap();
        let decoded = WireMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded.reject_reason().unwrap(), "join required");
    }

    #[test]
    fn test_wrong_accessor_errors() {
        let msg = WireMessage::undo("lobby", Uuid::new_v4());
        assert!(msg.stroke_payload().is_err());
        assert!(msg.welcome_payload().is_err());
        assert!(msg.live_message().is_err());
    }

    #[test]
    fn test_decode_invalid_bytes() {
        assert!(WireMessage::decode(&[0xFF, 0xFE, 0xFD]).is_err());
    }

    #[test]
    fn test_participant_color_is_deterministic() {
        let id = Uuid::new_v4();
        let a = ParticipantInfo::with_id(id, "A");
        let b = ParticipantInfo::with_id(id, "B");
        assert_eq!(a.color, b.color);
    }
}
