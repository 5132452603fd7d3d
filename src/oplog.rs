//! Append-only operation log — the source of truth for a room's canvas.
//!
//! Every drawing action and every undo/redo is an immutable `Operation`
//! appended to the room's `OperationLog`. Nothing is ever removed or
//! rewritten; visibility of a stroke is derived by the reconstruction
//! engine, never stored on the operation itself.
//!
//! Reference: Kleppmann — DDIA, Chapter 3 (The Log)

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single point sample in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Drawing tool that produced a stroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolKind {
    Pen,
    Marker,
    Eraser,
}

/// The replayable content of a stroke: point samples plus style.
///
/// Opaque to the core beyond structural validation — the renderer on the
/// client side decides what these mean visually.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokePayload {
    pub points: Vec<Point>,
    /// RGBA stroke color.
    pub color: [f32; 4],
    pub width: f32,
    pub tool: ToolKind,
}

impl StrokePayload {
    pub fn new(points: Vec<Point>, color: [f32; 4], width: f32, tool: ToolKind) -> Self {
        Self {
            points,
            color,
            width,
            tool,
        }
    }

    /// Structural validation performed before an append.
    ///
    /// A payload that fails here is rejected without touching the log.
    pub fn validate(&self) -> Result<(), PayloadError> {
        if self.points.is_empty() {
            return Err(PayloadError::EmptyStroke);
        }
        if self
            .points
            .iter()
            .any(|p| !p.x.is_finite() || !p.y.is_finite())
        {
            return Err(PayloadError::NonFinitePoint);
        }
        if !self.width.is_finite() || self.width <= 0.0 {
            return Err(PayloadError::NonPositiveWidth);
        }
        Ok(())
    }
}

/// Why a stroke payload failed structural validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadError {
    EmptyStroke,
    NonFinitePoint,
    NonPositiveWidth,
}

impl std::fmt::Display for PayloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyStroke => write!(f, "stroke has no points"),
            Self::NonFinitePoint => write!(f, "stroke contains a non-finite coordinate"),
            Self::NonPositiveWidth => write!(f, "stroke width must be positive and finite"),
        }
    }
}

impl std::error::Error for PayloadError {}

/// What an operation does to the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpKind {
    /// A completed stroke.
    Stroke(StrokePayload),
    /// Hides the targeted stroke. The target is always a stroke by the
    /// same author — the coordinator derives it from the undo index,
    /// never from client input.
    Undo { target: Uuid },
    /// Restores the targeted stroke (the author's most recent
    /// currently-effective undo).
    Redo { target: Uuid },
}

impl OpKind {
    /// True for `Stroke` variants.
    pub fn is_stroke(&self) -> bool {
        matches!(self, OpKind::Stroke(_))
    }
}

/// An immutable, timestamped record in the log.
///
/// `id` and `created_at` are assigned at append time by the room that owns
/// the log — never client-supplied, so clock skew cannot affect ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: Uuid,
    pub room_id: String,
    pub author_id: Uuid,
    pub kind: OpKind,
    /// Logical timestamp, monotonically increasing within a room.
    pub created_at: u64,
}

/// The append-only event history for one room.
#[derive(Debug, Clone)]
pub struct OperationLog {
    room_id: String,
    ops: Vec<Operation>,
    /// Next logical timestamp to assign.
    clock: u64,
}

impl OperationLog {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            ops: Vec::new(),
            clock: 0,
        }
    }

    /// Append an operation, assigning its id and logical timestamp.
    ///
    /// This is the single mutation point of the log. Structural validation
    /// of stroke payloads happens in the room coordinator before this call,
    /// so append itself cannot fail.
    pub fn append(&mut self, author_id: Uuid, kind: OpKind) -> Operation {
        let op = Operation {
            id: Uuid::new_v4(),
            room_id: self.room_id.clone(),
            author_id,
            kind,
            created_at: self.clock,
        };
        self.clock += 1;
        self.ops.push(op.clone());
        op
    }

    /// All operations in append order.
    pub fn operations(&self) -> &[Operation] {
        &self.ops
    }

    /// Operations from a log position onward.
    ///
    /// Lets a gateway pair a raster snapshot taken at `index` with only the
    /// tail operations instead of re-sending the full history.
    pub fn snapshot_from(&self, index: usize) -> &[Operation] {
        &self.ops[index.min(self.ops.len())..]
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }
}
