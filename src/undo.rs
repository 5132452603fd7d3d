//! Per-author undo/redo bookkeeping.
//!
//! Two explicit stacks per author: `undoable` holds the author's currently
//! visible strokes in creation order, `redone` holds the hidden ones in the
//! order they were hidden. Each undo/redo call is O(1) and the stack
//! formulation makes it impossible to target an already-hidden stroke —
//! which a backward log scan filtered only by author and kind cannot
//! guarantee.
//!
//! Invariant: a stroke id lives in exactly one of the two stacks, so an
//! author's total stroke count equals `undoable.len() + redone.len()`.

use std::collections::HashMap;
use uuid::Uuid;

/// What happens to an author's redo stack when they draw a new stroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedoPolicy {
    /// New strokes leave prior undos independently redoable. Undo/redo
    /// affect only the acting user's own timeline, so a fresh stroke does
    /// not invalidate anything. This is the coordinator's policy.
    #[default]
    KeepOnNewStroke,
    /// Strict editor convention: a new stroke clears the author's redo
    /// stack, as a new edit would in a text editor.
    ClearOnNewStroke,
}

#[derive(Debug, Default)]
struct AuthorStacks {
    undoable: Vec<Uuid>,
    redone: Vec<Uuid>,
}

/// Undo/redo index for one room, covering all authors.
#[derive(Debug)]
pub struct UndoRedoIndex {
    stacks: HashMap<Uuid, AuthorStacks>,
    policy: RedoPolicy,
}

impl UndoRedoIndex {
    pub fn new(policy: RedoPolicy) -> Self {
        Self {
            stacks: HashMap::new(),
            policy,
        }
    }

    /// Record a freshly committed stroke as the author's newest undoable.
    pub fn record_stroke(&mut self, author_id: Uuid, stroke_id: Uuid) {
        let stacks = self.stacks.entry(author_id).or_default();
        stacks.undoable.push(stroke_id);
        if self.policy == RedoPolicy::ClearOnNewStroke {
            stacks.redone.clear();
        }
    }

    /// Pop the author's most recent visible stroke, mark it hidden, and
    /// return its id. `None` when there is nothing to undo — the caller
    /// must not append any operation in that case.
    pub fn undo(&mut self, author_id: Uuid) -> Option<Uuid> {
        let stacks = self.stacks.get_mut(&author_id)?;
        let stroke_id = stacks.undoable.pop()?;
        stacks.redone.push(stroke_id);
        Some(stroke_id)
    }

    /// Pop the author's most recently hidden stroke, mark it visible again,
    /// and return its id. `None` when there is nothing to redo.
    pub fn redo(&mut self, author_id: Uuid) -> Option<Uuid> {
        let stacks = self.stacks.get_mut(&author_id)?;
        let stroke_id = stacks.redone.pop()?;
        stacks.undoable.push(stroke_id);
        Some(stroke_id)
    }

    /// Number of strokes the author could currently undo.
    pub fn undoable_count(&self, author_id: Uuid) -> usize {
        self.stacks
            .get(&author_id)
            .map_or(0, |s| s.undoable.len())
    }

    /// Number of strokes the author could currently redo.
    pub fn redone_count(&self, author_id: Uuid) -> usize {
        self.stacks.get(&author_id).map_or(0, |s| s.redone.len())
    }

    pub fn policy(&self) -> RedoPolicy {
        self.policy
    }
}

impl Default for UndoRedoIndex {
    fn default() -> Self {
        Self::new(RedoPolicy::default())
    }
}
