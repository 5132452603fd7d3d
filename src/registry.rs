//! Session registry: room lifecycle and the per-room serialization point.
//!
//! Rooms are created lazily on first join and destroyed when the last
//! participant leaves — the registry owns the only map of rooms, so a room
//! never outlives its members. Each room pairs its coordinator state with
//! a fan-out group:
//!
//! ```text
//! SessionRegistry
//!   rooms: RwLock<HashMap<room_id, Arc<RoomHandle>>>
//!                              │
//!                              ├── Mutex<RoomState>   (log + undo index + participants)
//!                              └── BroadcastGroup     (fan-out channel)
//! ```
//!
//! Every mutating call locks the room mutex for the duration of the
//! mutation and never awaits network I/O while holding it. Rooms are
//! independent, so different rooms proceed fully in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::Receiver;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::broadcast::BroadcastGroup;
use crate::oplog::{Operation, StrokePayload};
use crate::protocol::ParticipantInfo;
use crate::room::{RoomError, RoomState};

/// One room's shared state: coordinator behind a mutex, fan-out beside it.
pub struct RoomHandle {
    pub state: Mutex<RoomState>,
    pub broadcast: BroadcastGroup,
}

/// Everything a new joiner gets back from [`SessionRegistry::join`].
pub struct Admission {
    pub participant: ParticipantInfo,
    /// Visible strokes reconstructed from the log at join time.
    pub history: Vec<Operation>,
    /// Roster after the join, the new participant included.
    pub participants: Vec<ParticipantInfo>,
    /// This connection's subscription to the room's fan-out.
    pub receiver: Receiver<Arc<Vec<u8>>>,
    pub room: Arc<RoomHandle>,
}

/// Result of a leave: who departed and what is left of the room.
pub struct Departure {
    pub participant: ParticipantInfo,
    /// Roster after the departure; empty when the room closed.
    pub remaining: Vec<ParticipantInfo>,
    pub room_closed: bool,
}

/// Maps room identifiers to live rooms across all connections.
pub struct SessionRegistry {
    rooms: RwLock<HashMap<String, Arc<RoomHandle>>>,
    broadcast_capacity: usize,
    max_participants_per_room: usize,
}

impl SessionRegistry {
    pub fn new(broadcast_capacity: usize) -> Self {
        Self::with_room_limit(broadcast_capacity, usize::MAX)
    }

    /// A registry whose rooms reject joins beyond `max_participants_per_room`.
    pub fn with_room_limit(broadcast_capacity: usize, max_participants_per_room: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            broadcast_capacity,
            max_participants_per_room,
        }
    }

    /// Join a room, creating it if this is the first participant.
    ///
    /// The capacity check runs under the room lock, so concurrent joins
    /// cannot overfill a room.
    pub async fn join(
        &self,
        room_id: &str,
        connection_id: Uuid,
        display_name: &str,
    ) -> Result<Admission, RoomError> {
        let room = self.get_or_create(room_id).await;

        let (participant, history, participants) = {
            let mut state = room.state.lock().await;
            if state.participant_count() >= self.max_participants_per_room
                && state.participant(connection_id).is_none()
            {
                return Err(RoomError::RoomFull(room_id.to_string()));
            }
            let (participant, history) = state.join(connection_id, display_name);
            (participant, history, state.participants())
        };
        let receiver = room.broadcast.subscribe();

        Ok(Admission {
            participant,
            history,
            participants,
            receiver,
            room,
        })
    }

    /// Leave a room; tears the room down when it empties.
    ///
    /// `Ok(None)` when the connection was not a participant (e.g. a double
    /// disconnect) — normal lifecycle, not an error.
    pub async fn leave(
        &self,
        room_id: &str,
        connection_id: Uuid,
    ) -> Result<Option<Departure>, RoomError> {
        let room = self.room(room_id).await?;

        let (departed, remaining, now_empty) = {
            let mut state = room.state.lock().await;
            let departed = state.leave(connection_id);
            (departed, state.participants(), state.is_empty())
        };

        let Some(participant) = departed else {
            return Ok(None);
        };

        let mut room_closed = false;
        if now_empty {
            let mut rooms = self.rooms.write().await;
            // Re-check under the write lock; a join may have raced in
            if let Some(handle) = rooms.get(room_id) {
                if handle.state.lock().await.is_empty() {
                    rooms.remove(room_id);
                    room_closed = true;
                    log::info!("room {room_id} removed (empty)");
                }
            }
        }

        Ok(Some(Departure {
            participant,
            remaining,
            room_closed,
        }))
    }

    /// Commit a stroke through the room's serialization point.
    pub async fn commit_stroke(
        &self,
        room_id: &str,
        author_id: Uuid,
        payload: StrokePayload,
    ) -> Result<Operation, RoomError> {
        let room = self.room(room_id).await?;
        let mut state = room.state.lock().await;
        state.commit_stroke(author_id, payload)
    }

    /// Undo for one author. `Ok(None)` is the defined no-op: nothing was
    /// appended and nothing must be broadcast.
    pub async fn undo(
        &self,
        room_id: &str,
        author_id: Uuid,
    ) -> Result<Option<Operation>, RoomError> {
        let room = self.room(room_id).await?;
        let mut state = room.state.lock().await;
        state.undo(author_id)
    }

    pub async fn redo(
        &self,
        room_id: &str,
        author_id: Uuid,
    ) -> Result<Option<Operation>, RoomError> {
        let room = self.room(room_id).await?;
        let mut state = room.state.lock().await;
        state.redo(author_id)
    }

    /// Current visible strokes of a room (consistent snapshot: taken under
    /// the room lock, never a partially applied state).
    pub async fn active_operations(&self, room_id: &str) -> Result<Vec<Operation>, RoomError> {
        let room = self.room(room_id).await?;
        let state = room.state.lock().await;
        Ok(state.active_operations())
    }

    /// Participant roster for UI population; empty for an absent room.
    pub async fn users_in(&self, room_id: &str) -> Vec<ParticipantInfo> {
        let rooms = self.rooms.read().await;
        match rooms.get(room_id) {
            Some(room) => room.state.lock().await.participants(),
            None => Vec::new(),
        }
    }

    /// Look up a live room.
    pub async fn room(&self, room_id: &str) -> Result<Arc<RoomHandle>, RoomError> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room_id)
            .cloned()
            .ok_or_else(|| RoomError::UnknownRoom(room_id.to_string()))
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn room_ids(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }

    async fn get_or_create(&self, room_id: &str) -> Arc<RoomHandle> {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(room_id) {
                return room.clone();
            }
        }

        // Slow path: write lock, double-checked
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(room_id) {
            return room.clone();
        }

        log::info!("room {room_id} created");
        let room = Arc::new(RoomHandle {
            state: Mutex::new(RoomState::new(room_id)),
            broadcast: BroadcastGroup::new(self.broadcast_capacity),
        });
        rooms.insert(room_id.to_string(), room.clone());
        room
    }
}
