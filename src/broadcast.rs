//! Fan-out of pre-encoded frames to all members of a room.
//!
//! One tokio broadcast channel per room; each connection holds its own
//! receiver with `capacity` frames of buffering. Frames are `Arc<Vec<u8>>`
//! so a message is encoded once and shared across N receivers. A lagging
//! receiver drops its oldest buffered frames — acceptable for previews and
//! cursors, and surfaced with a warning for everything else.
//!
//! Reference: Patterson & Hennessy, Section 6.4 — Interconnection Networks

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Snapshot of fan-out counters for monitoring.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub frames_sent: u64,
    pub receivers: usize,
}

/// A broadcast group for a single room.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<Vec<u8>>>,
    capacity: usize,
    // Lock-free: send paths never take a lock
    frames_sent: AtomicU64,
}

impl BroadcastGroup {
    /// `capacity` is the number of frames buffered per receiver before a
    /// slow connection starts lagging.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            frames_sent: AtomicU64::new(0),
        }
    }

    /// Subscribe a new receiver for a connection joining the room.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Vec<u8>>> {
        self.sender.subscribe()
    }

    /// Send a pre-encoded frame to every receiver.
    ///
    /// Returns the number of receivers it reached; zero when the room has
    /// no listeners, which is not an error.
    pub fn send(&self, frame: Arc<Vec<u8>>) -> usize {
        let count = self.sender.send(frame).unwrap_or(0);
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            receivers: self.sender.receiver_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fan_out_reaches_all_receivers() {
        let group = BroadcastGroup::new(16);
        let mut rx1 = group.subscribe();
        let mut rx2 = group.subscribe();
        let mut rx3 = group.subscribe();

        let frame = Arc::new(vec![1u8, 2, 3]);
        assert_eq!(group.send(frame.clone()), 3);

        assert_eq!(*rx1.recv().await.unwrap(), vec![1, 2, 3]);
        assert_eq!(*rx2.recv().await.unwrap(), vec![1, 2, 3]);
        assert_eq!(*rx3.recv().await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_send_without_receivers_is_harmless() {
        let group = BroadcastGroup::new(16);
        assert_eq!(group.send(Arc::new(vec![0u8])), 0);
    }

    #[tokio::test]
    async fn test_receiver_count_tracks_drops() {
        let group = BroadcastGroup::new(16);
        let rx1 = group.subscribe();
        let rx2 = group.subscribe();
        assert_eq!(group.receiver_count(), 2);
        drop(rx1);
        drop(rx2);
        assert_eq!(group.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_stats_count_sends() {
        let group = BroadcastGroup::new(16);
        let _rx = group.subscribe();
        group.send(Arc::new(vec![1]));
        group.send(Arc::new(vec![2]));

        let stats = group.stats();
        assert_eq!(stats.frames_sent, 2);
        assert_eq!(stats.receivers, 1);
    }

    #[tokio::test]
    async fn test_capacity_reported() {
        let group = BroadcastGroup::new(64);
        assert_eq!(group.capacity(), 64);
    }
}
