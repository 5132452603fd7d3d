//! # scrawl-collab — Real-time collaborative canvas
//!
//! Many participants draw on a shared canvas, see each other's strokes and
//! cursors live, and undo/redo only their own work. There is no
//! authoritative bitmap anywhere: ground truth is an append-only operation
//! log per room, and the current drawing is always derived from it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     WebSocket      ┌──────────────┐
//! │ CanvasClient │ ◄─────────────────► │ CanvasServer │
//! │ (per user)   │    Binary Proto     │ (central)    │
//! └──────┬───────┘                     └──────┬───────┘
//!        │                                    │
//!        ▼                                    ▼
//! ┌──────────────┐                    ┌────────────────┐
//! │ local render │                    │ SessionRegistry │
//! └──────────────┘                    └───────┬────────┘
//!                                             │ per room
//!                                   ┌─────────┴──────────┐
//!                                   │ Mutex<RoomState>    │  log + undo index
//!                                   │ BroadcastGroup      │  fan-out
//!                                   └────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`oplog`] — append-only operation log, the source of truth
//! - [`undo`] — per-author undo/redo stacks
//! - [`reconstruct`] — log → visible strokes, full and incremental
//! - [`room`] — room coordinator state, the sole mutation point
//! - [`registry`] — room lifecycle and per-room serialization
//! - [`broadcast`] — zero-copy frame fan-out per room
//! - [`presence`] — live previews, cursors, participant colors
//! - [`protocol`] — binary wire envelope (bincode)
//! - [`server`] / [`client`] — the WebSocket gateway and its counterpart
//!
//! State is ephemeral by design: a room's log lives exactly as long as the
//! room has participants, and a process restart starts blank.

pub mod broadcast;
pub mod client;
pub mod oplog;
pub mod presence;
pub mod protocol;
pub mod reconstruct;
pub mod registry;
pub mod room;
pub mod server;
pub mod undo;

// Re-exports for convenience
pub use broadcast::{BroadcastGroup, BroadcastStats};
pub use client::{CanvasClient, ClientEvent, ConnectionState};
pub use oplog::{OpKind, Operation, OperationLog, PayloadError, Point, StrokePayload, ToolKind};
pub use presence::{CursorThrottle, LiveMessage, ParticipantColor, Vec2};
pub use protocol::{
    JoinRequest, MessageType, ParticipantInfo, ProtocolError, WelcomePayload, WireMessage,
};
pub use reconstruct::{active_operations, ActiveSet};
pub use registry::{Admission, Departure, RoomHandle, SessionRegistry};
pub use room::{RoomError, RoomState};
pub use server::{CanvasServer, ServerConfig, ServerStats};
pub use undo::{RedoPolicy, UndoRedoIndex};
