//! Live preview and cursor presence.
//!
//! These messages are purely advisory: they bypass the room coordinator,
//! carry no ordering or durability guarantee, and losing one is harmless.
//! A live preview shows a stroke-in-progress before it is committed;
//! cursor updates never affect canvas state.
//!
//! Reference: Kleppmann, Chapter 8 — Broadcast Protocols

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::oplog::StrokePayload;

/// 2D position in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// RGBA display color assigned to a participant.
///
/// Cosmetic only — collision-tolerant, no uniqueness guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParticipantColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl ParticipantColor {
    /// Derive a stable, visually distinct color from a connection id.
    ///
    /// Hue comes from the UUID hash; saturation and lightness are fixed
    /// high so cursors stay vivid against the canvas.
    pub fn from_uuid(id: Uuid) -> Self {
        let hash = id.as_u128();
        let hue = ((hash % 360) as f32) / 360.0;
        let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.6);
        Self { r, g, b, a: 1.0 }
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (l, l, l);
    }

    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;

    (
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    )
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}

/// Ephemeral messages relayed point-to-point without touching the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LiveMessage {
    /// A stroke-in-progress segment: the points drawn so far plus style,
    /// so other participants can render the preview with the right look.
    Preview {
        author_id: Uuid,
        segment: StrokePayload,
    },
    /// Cursor position update (high frequency, throttled by the sender).
    Cursor {
        author_id: Uuid,
        position: Vec2,
        /// Sender-side monotonic counter so receivers can drop stale
        /// updates delivered out of order.
        timestamp: u64,
    },
}

impl LiveMessage {
    pub fn preview(author_id: Uuid, segment: StrokePayload) -> Self {
        LiveMessage::Preview { author_id, segment }
    }

    pub fn cursor(author_id: Uuid, position: Vec2, timestamp: u64) -> Self {
        LiveMessage::Cursor {
            author_id,
            position,
            timestamp,
        }
    }

    pub fn author_id(&self) -> Uuid {
        match self {
            LiveMessage::Preview { author_id, .. } => *author_id,
            LiveMessage::Cursor { author_id, .. } => *author_id,
        }
    }

    /// Rewrite the author id, keeping everything else. The gateway uses
    /// this to stamp relayed messages with the sending connection's
    /// identity, whatever the sender claimed.
    pub fn with_author(self, author_id: Uuid) -> Self {
        match self {
            LiveMessage::Preview { segment, .. } => LiveMessage::Preview { author_id, segment },
            LiveMessage::Cursor {
                position,
                timestamp,
                ..
            } => LiveMessage::Cursor {
                author_id,
                position,
                timestamp,
            },
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, String> {
        bincode::serde::encode_to_vec(self, bincode::config::standard()).map_err(|e| e.to_string())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, String> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| e.to_string())?;
        Ok(msg)
    }
}

/// Rate limiter for outgoing cursor updates.
///
/// Cursors move every frame; broadcasting each sample floods the room.
/// 33ms between sends (30fps) is indistinguishable on screen.
#[derive(Debug)]
pub struct CursorThrottle {
    last_sent: Instant,
    interval: Duration,
    counter: u64,
}

impl CursorThrottle {
    pub fn new() -> Self {
        Self::with_interval(Duration::from_millis(33))
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            // Allow an immediate first send
            last_sent: Instant::now() - interval,
            interval,
            counter: 0,
        }
    }

    /// Build a cursor message if enough time has passed, `None` if throttled.
    pub fn cursor_update(&mut self, author_id: Uuid, position: Vec2) -> Option<LiveMessage> {
        if self.last_sent.elapsed() < self.interval {
            return None;
        }
        self.last_sent = Instant::now();
        self.counter += 1;
        Some(LiveMessage::cursor(author_id, position, self.counter))
    }

    /// Build a cursor message regardless of the rate limit.
    pub fn force_cursor_update(&mut self, author_id: Uuid, position: Vec2) -> LiveMessage {
        self.last_sent = Instant::now();
        self.counter += 1;
        LiveMessage::cursor(author_id, position, self.counter)
    }
}

impl Default for CursorThrottle {
    fn default() -> Self {
        Self::new()
    }
}
