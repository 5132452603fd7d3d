//! Reconstruction engine: operation log → currently visible strokes.
//!
//! Two forms, required to agree:
//! - [`active_operations`] — a pure fold over the full log, recomputed from
//!   scratch. Used when full consistency must be provable, e.g. building the
//!   history sent to a late joiner. Any consumer holding the same log
//!   derives the same answer.
//! - [`ActiveSet`] — the incremental variant that patches a cached active
//!   set with each new trailing operation. This is the production hot path;
//!   `tests/room_semantics.rs` proves both forms agree.
//!
//! Ordering: surviving strokes come out sorted by their original
//! `created_at`, so undo/redo only changes membership, never order.
//!
//! Reference: Kleppmann — DDIA, Chapter 11 (Event Sourcing)

use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::oplog::{OpKind, Operation};

/// Compute the visible strokes from a full log, in creation order.
///
/// Deterministic and idempotent: the same log always yields the same result.
pub fn active_operations(log: &[Operation]) -> Vec<Operation> {
    let mut set = ActiveSet::new();
    for op in log {
        set.apply(op);
    }
    set.collect()
}

/// Incrementally maintained set of visible strokes.
///
/// Keeps every stroke ever seen (so a `Redo` can restore the original) plus
/// the set of currently visible ids.
#[derive(Debug, Default)]
pub struct ActiveSet {
    /// All stroke operations ever applied, with a first-seen sequence
    /// number used only to break `created_at` ties deterministically.
    originals: HashMap<Uuid, (u64, Operation)>,
    visible: HashSet<Uuid>,
    next_seq: u64,
}

impl ActiveSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one trailing operation from the log.
    pub fn apply(&mut self, op: &Operation) {
        match &op.kind {
            OpKind::Stroke(_) => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.originals.entry(op.id).or_insert((seq, op.clone()));
                self.visible.insert(op.id);
            }
            OpKind::Undo { target } => {
                self.visible.remove(target);
            }
            OpKind::Redo { target } => {
                // A redo can only restore a stroke that exists in the log
                if self.originals.contains_key(target) {
                    self.visible.insert(*target);
                }
            }
        }
    }

    /// The visible strokes sorted by original creation time.
    pub fn collect(&self) -> Vec<Operation> {
        let mut out: Vec<&(u64, Operation)> = self
            .visible
            .iter()
            .filter_map(|id| self.originals.get(id))
            .collect();
        out.sort_by_key(|(seq, op)| (op.created_at, *seq));
        out.iter().map(|(_, op)| op.clone()).collect()
    }

    /// Ids of the visible strokes, unordered.
    pub fn visible_ids(&self) -> &HashSet<Uuid> {
        &self.visible
    }

    pub fn contains(&self, stroke_id: Uuid) -> bool {
        self.visible.contains(&stroke_id)
    }

    pub fn len(&self) -> usize {
        self.visible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oplog::{OperationLog, Point, StrokePayload, ToolKind};

    fn payload() -> StrokePayload {
        StrokePayload::new(
            vec![Point::new(1.0, 2.0)],
            [1.0, 0.0, 0.0, 1.0],
            3.0,
            ToolKind::Pen,
        )
    }

    #[test]
    fn test_strokes_accumulate_in_order() {
        let mut log = OperationLog::new("r");
        let author = Uuid::new_v4();
        let s1 = log.append(author, OpKind::Stroke(payload()));
        let s2 = log.append(author, OpKind::Stroke(payload()));

        let active = active_operations(log.operations());
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].id, s1.id);
        assert_eq!(active[1].id, s2.id);
    }

    #[test]
    fn test_undo_removes_target() {
        let mut log = OperationLog::new("r");
        let author = Uuid::new_v4();
        let s1 = log.append(author, OpKind::Stroke(payload()));
        let s2 = log.append(author, OpKind::Stroke(payload()));
        log.append(author, OpKind::Undo { target: s2.id });

        let active = active_operations(log.operations());
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, s1.id);
    }

    #[test]
    fn test_redo_restores_original_timestamp() {
        let mut log = OperationLog::new("r");
        let author = Uuid::new_v4();
        let s1 = log.append(author, OpKind::Stroke(payload()));
        let s2 = log.append(author, OpKind::Stroke(payload()));
        let s3 = log.append(author, OpKind::Stroke(payload()));
        log.append(author, OpKind::Undo { target: s1.id });
        log.append(author, OpKind::Redo { target: s1.id });

        // s1 returns with its original created_at, so it sorts first again
        let active = active_operations(log.operations());
        let ids: Vec<Uuid> = active.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![s1.id, s2.id, s3.id]);
        assert_eq!(active[0].created_at, s1.created_at);
    }

    #[test]
    fn test_redo_of_unknown_target_is_ignored() {
        let mut log = OperationLog::new("r");
        let author = Uuid::new_v4();
        log.append(author, OpKind::Redo { target: Uuid::new_v4() });
        assert!(active_operations(log.operations()).is_empty());
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let mut log = OperationLog::new("r");
        let author = Uuid::new_v4();
        let s1 = log.append(author, OpKind::Stroke(payload()));
        log.append(author, OpKind::Undo { target: s1.id });
        log.append(author, OpKind::Redo { target: s1.id });

        let first = active_operations(log.operations());
        let second = active_operations(log.operations());
        assert_eq!(first, second);
    }

    #[test]
    fn test_incremental_matches_full_recompute() {
        let mut log = OperationLog::new("r");
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let mut incremental = ActiveSet::new();

        let a1 = log.append(alice, OpKind::Stroke(payload()));
        let b1 = log.append(bob, OpKind::Stroke(payload()));
        let a2 = log.append(alice, OpKind::Stroke(payload()));
        let script = vec![
            OpKind::Undo { target: a2.id },
            OpKind::Undo { target: b1.id },
            OpKind::Redo { target: a2.id },
            OpKind::Stroke(payload()),
            OpKind::Undo { target: a1.id },
            OpKind::Redo { target: b1.id },
        ];

        for op in log.operations() {
            incremental.apply(op);
        }
        for kind in script {
            let op = log.append(alice, kind);
            incremental.apply(&op);
            assert_eq!(
                incremental.collect(),
                active_operations(log.operations()),
                "incremental and full reconstruction diverged"
            );
        }
    }

    #[test]
    fn test_visible_ids_tracking() {
        let mut log = OperationLog::new("r");
        let author = Uuid::new_v4();
        let mut set = ActiveSet::new();

        let s1 = log.append(author, OpKind::Stroke(payload()));
        set.apply(&s1);
        assert!(set.contains(s1.id));
        assert_eq!(set.len(), 1);

        let undo = log.append(author, OpKind::Undo { target: s1.id });
        set.apply(&undo);
        assert!(!set.contains(s1.id));
        assert!(set.is_empty());
    }
}
