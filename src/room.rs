//! Room coordinator state: the sole mutation point for one room.
//!
//! A `RoomState` owns the operation log, the undo/redo index, and the set
//! of connected participants. All methods are synchronous and touch no
//! I/O; the session registry wraps each room in a mutex and holds it for
//! the duration of a call, which gives every mutation the serialization
//! guarantee. Broadcasting happens after the mutation returns, from the
//! returned value.
//!
//! Nothing here is fatal: malformed requests degrade to a rejected call,
//! and undo/redo with nothing to act on are defined no-ops that emit no
//! operation.

use std::collections::HashMap;
use uuid::Uuid;

use crate::oplog::{OpKind, Operation, OperationLog, PayloadError, StrokePayload};
use crate::protocol::ParticipantInfo;
use crate::reconstruct::{active_operations, ActiveSet};
use crate::undo::{RedoPolicy, UndoRedoIndex};

/// Structural errors rejected by the coordinator. Nothing-to-undo/redo is
/// not in here — those are no-ops, not errors.
#[derive(Debug, Clone)]
pub enum RoomError {
    UnknownRoom(String),
    UnknownAuthor(Uuid),
    MalformedStroke(PayloadError),
    RoomFull(String),
}

impl std::fmt::Display for RoomError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownRoom(id) => write!(f, "unknown room: {id}"),
            Self::UnknownAuthor(id) => write!(f, "unknown author: {id}"),
            Self::MalformedStroke(e) => write!(f, "malformed stroke: {e}"),
            Self::RoomFull(id) => write!(f, "room {id} is full"),
        }
    }
}

impl std::error::Error for RoomError {}

impl From<PayloadError> for RoomError {
    fn from(e: PayloadError) -> Self {
        RoomError::MalformedStroke(e)
    }
}

/// Authoritative state for one room.
pub struct RoomState {
    id: String,
    log: OperationLog,
    index: UndoRedoIndex,
    participants: HashMap<Uuid, ParticipantInfo>,
    /// Incrementally maintained active set — the production read path.
    active: ActiveSet,
}

impl RoomState {
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_policy(id, RedoPolicy::default())
    }

    pub fn with_policy(id: impl Into<String>, policy: RedoPolicy) -> Self {
        let id = id.into();
        Self {
            log: OperationLog::new(id.clone()),
            index: UndoRedoIndex::new(policy),
            participants: HashMap::new(),
            active: ActiveSet::new(),
            id,
        }
    }

    /// Register a participant and return their identity plus the history a
    /// late joiner needs.
    ///
    /// The history is recomputed purely from the log rather than read from
    /// the incremental cache, so what the joiner receives is provably what
    /// any consumer would derive from the same log.
    pub fn join(&mut self, connection_id: Uuid, display_name: &str) -> (ParticipantInfo, Vec<Operation>) {
        let participant = ParticipantInfo::with_id(connection_id, display_name);
        self.participants.insert(connection_id, participant.clone());
        log::info!(
            "participant {} ({connection_id}) joined room {}",
            participant.name,
            self.id
        );
        (participant, active_operations(self.log.operations()))
    }

    /// Remove a participant. Operations they committed stay in the log
    /// permanently; only future mutations stop being attributed to them.
    pub fn leave(&mut self, connection_id: Uuid) -> Option<ParticipantInfo> {
        let departed = self.participants.remove(&connection_id);
        if let Some(ref p) = departed {
            log::info!("participant {} left room {}", p.name, self.id);
        }
        departed
    }

    /// Append a completed stroke and record it as the author's newest
    /// undoable. Returns the committed operation for broadcast.
    pub fn commit_stroke(
        &mut self,
        author_id: Uuid,
        payload: StrokePayload,
    ) -> Result<Operation, RoomError> {
        self.require_author(author_id)?;
        payload.validate()?;

        let op = self.log.append(author_id, OpKind::Stroke(payload));
        self.index.record_stroke(author_id, op.id);
        self.active.apply(&op);
        log::debug!("stroke {} committed in room {} at t={}", op.id, self.id, op.created_at);
        Ok(op)
    }

    /// Undo the author's most recent visible stroke.
    ///
    /// `Ok(None)` when there is nothing to undo: no operation is appended
    /// and the caller must not broadcast anything.
    pub fn undo(&mut self, author_id: Uuid) -> Result<Option<Operation>, RoomError> {
        self.require_author(author_id)?;

        let Some(target) = self.index.undo(author_id) else {
            return Ok(None);
        };
        let op = self.log.append(author_id, OpKind::Undo { target });
        self.active.apply(&op);
        Ok(Some(op))
    }

    /// Redo the author's most recently undone stroke. Same no-op contract
    /// as [`RoomState::undo`].
    pub fn redo(&mut self, author_id: Uuid) -> Result<Option<Operation>, RoomError> {
        self.require_author(author_id)?;

        let Some(target) = self.index.redo(author_id) else {
            return Ok(None);
        };
        let op = self.log.append(author_id, OpKind::Redo { target });
        self.active.apply(&op);
        Ok(Some(op))
    }

    /// The currently visible strokes in creation order, from the
    /// incremental cache.
    pub fn active_operations(&self) -> Vec<Operation> {
        self.active.collect()
    }

    pub fn participants(&self) -> Vec<ParticipantInfo> {
        let mut list: Vec<ParticipantInfo> = self.participants.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        list
    }

    pub fn participant(&self, connection_id: Uuid) -> Option<&ParticipantInfo> {
        self.participants.get(&connection_id)
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Read-only view of the full log.
    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    /// Tail of the log from a position onward, for snapshot+tail delivery.
    pub fn snapshot_from(&self, index: usize) -> &[Operation] {
        self.log.snapshot_from(index)
    }

    fn require_author(&self, author_id: Uuid) -> Result<(), RoomError> {
        if self.participants.contains_key(&author_id) {
            Ok(())
        } else {
            Err(RoomError::UnknownAuthor(author_id))
        }
    }
}
