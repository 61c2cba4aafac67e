//! Per-room fan-out with backpressure.
//!
//! Uses tokio broadcast channels for O(1) send to all subscribers.
//! Each peer gets an independent receiver that buffers up to `capacity`
//! frames; a lagging peer drops the oldest ones, which is safe because every
//! `CodeChange` carries the whole document.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::{Envelope, PeerInfo, ProtocolError};

/// Pre-encoded frame plus the peer that produced it.
///
/// Receivers compare `sender` against their own id to avoid echoing a frame
/// back to its author without decoding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sender: Uuid,
    pub bytes: Vec<u8>,
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub active_peers: usize,
}

/// A broadcast group for a single room.
///
/// All peers in the same room share one broadcast channel. The group also
/// remembers the latest full text so that late joiners can be brought up to
/// date.
#[derive(Debug)]
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<Frame>>,
    peers: RwLock<HashMap<Uuid, PeerInfo>>,
    latest_code: RwLock<Option<String>>,
    capacity: usize,
    messages_sent: AtomicU64,
}

impl BroadcastGroup {
    /// Create a new broadcast group with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            peers: RwLock::new(HashMap::new()),
            latest_code: RwLock::new(None),
            capacity,
            messages_sent: AtomicU64::new(0),
        }
    }

    /// Add a peer to this broadcast group.
    ///
    /// Returns a receiver for this peer to consume frames.
    pub async fn add_peer(&self, info: PeerInfo) -> broadcast::Receiver<Arc<Frame>> {
        let mut peers = self.peers.write().await;
        peers.insert(info.peer_id, info);
        self.sender.subscribe()
    }

    pub async fn remove_peer(&self, peer_id: &Uuid) -> Option<PeerInfo> {
        self.peers.write().await.remove(peer_id)
    }

    /// Encode and fan out an envelope from `envelope.peer_id`.
    ///
    /// Returns the number of receivers, the sender's own included;
    /// filtering is the receiver's job.
    pub fn broadcast(&self, envelope: &Envelope) -> Result<usize, ProtocolError> {
        let bytes = envelope.encode()?;
        Ok(self.broadcast_raw(envelope.peer_id, bytes))
    }

    /// Fan out bytes that are already encoded.
    pub fn broadcast_raw(&self, sender: Uuid, bytes: Vec<u8>) -> usize {
        let count = self
            .sender
            .send(Arc::new(Frame { sender, bytes }))
            .unwrap_or(0);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Remember `code` as the room's current text.
    pub async fn set_latest_code(&self, code: impl Into<String>) {
        *self.latest_code.write().await = Some(code.into());
    }

    pub async fn latest_code(&self) -> Option<String> {
        self.latest_code.read().await.clone()
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn peers(&self) -> Vec<PeerInfo> {
        self.peers.read().await.values().cloned().collect()
    }

    pub async fn has_peer(&self, peer_id: &Uuid) -> bool {
        self.peers.read().await.contains_key(peer_id)
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            active_peers: self.peers.read().await.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Maps room ids to broadcast groups.
///
/// Joining and leaving go through the manager so that creating, filling and
/// removing a room happen under one lock.
pub struct RoomManager {
    rooms: RwLock<HashMap<String, Arc<BroadcastGroup>>>,
    default_capacity: usize,
}

impl RoomManager {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            default_capacity,
        }
    }

    /// Get or create the group for `room_id`.
    pub async fn get_or_create(&self, room_id: &str) -> Arc<BroadcastGroup> {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(room_id) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Arc::new(BroadcastGroup::new(self.default_capacity)))
            .clone()
    }

    pub async fn get(&self, room_id: &str) -> Option<Arc<BroadcastGroup>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// Add `info` to `room_id`, creating the room if needed.
    ///
    /// Fails with [`ProtocolError::RoomFull`] once the room holds `max_peers`.
    pub async fn join(
        &self,
        room_id: &str,
        info: PeerInfo,
        max_peers: usize,
    ) -> Result<(Arc<BroadcastGroup>, broadcast::Receiver<Arc<Frame>>), ProtocolError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Arc::new(BroadcastGroup::new(self.default_capacity)))
            .clone();

        if room.peer_count().await >= max_peers {
            if room.peer_count().await == 0 {
                rooms.remove(room_id);
            }
            return Err(ProtocolError::RoomFull {
                room_id: room_id.to_string(),
                max_peers,
            });
        }

        let rx = room.add_peer(info).await;
        Ok((room, rx))
    }

    /// Remove `peer_id` from `room_id`; drops the room when it becomes empty.
    ///
    /// Returns the group the peer left (if it was present) and whether the
    /// room was removed.
    pub async fn leave(&self, room_id: &str, peer_id: &Uuid) -> (Option<Arc<BroadcastGroup>>, bool) {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(room_id).cloned() else {
            return (None, false);
        };

        room.remove_peer(peer_id).await;
        if room.peer_count().await == 0 {
            rooms.remove(room_id);
            return (Some(room), true);
        }
        (Some(room), false)
    }

    /// Remove a room if nobody is in it.
    pub async fn remove_if_empty(&self, room_id: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(room_id) {
            if room.peer_count().await == 0 {
                rooms.remove(room_id);
                return true;
            }
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_rooms(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncpad_core::SyncMessage;

    #[tokio::test]
    async fn test_broadcast_group_add_remove() {
        let group = BroadcastGroup::new(16);
        let peer = PeerInfo::new("Alice");
        let peer_id = peer.peer_id;

        let _rx = group.add_peer(peer).await;
        assert_eq!(group.peer_count().await, 1);
        assert!(group.has_peer(&peer_id).await);

        group.remove_peer(&peer_id).await;
        assert_eq!(group.peer_count().await, 0);
        assert!(!group.has_peer(&peer_id).await);
    }

    #[tokio::test]
    async fn test_broadcast_fan_out_tags_sender() {
        let group = BroadcastGroup::new(16);
        let alice = PeerInfo::new("Alice");
        let bob = PeerInfo::new("Bob");

        let mut rx_alice = group.add_peer(alice.clone()).await;
        let mut rx_bob = group.add_peer(bob).await;

        let msg = SyncMessage::code_change("room-1", "x=1");
        let envelope = Envelope::code_change(alice.peer_id, &msg).unwrap();
        assert_eq!(group.broadcast(&envelope).unwrap(), 2);

        let frame = rx_bob.recv().await.unwrap();
        assert_eq!(frame.sender, alice.peer_id);
        assert_eq!(Envelope::decode(&frame.bytes).unwrap().sync_message().unwrap(), msg);

        let own = rx_alice.recv().await.unwrap();
        assert_eq!(own.sender, alice.peer_id);
    }

    #[tokio::test]
    async fn test_latest_code() {
        let group = BroadcastGroup::new(4);
        assert_eq!(group.latest_code().await, None);
        group.set_latest_code("a").await;
        group.set_latest_code("ab").await;
        assert_eq!(group.latest_code().await.as_deref(), Some("ab"));
    }

    #[tokio::test]
    async fn test_broadcast_stats() {
        let group = BroadcastGroup::new(16);
        let peer = PeerInfo::new("Alice");
        let _rx = group.add_peer(peer.clone()).await;

        group.broadcast(&Envelope::ping(peer.peer_id)).unwrap();
        group.broadcast_raw(peer.peer_id, vec![1, 2, 3]);

        let stats = group.stats().await;
        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.active_peers, 1);
    }

    #[tokio::test]
    async fn test_lagging_receiver_skips_to_newest() {
        let group = BroadcastGroup::new(2);
        let peer = PeerInfo::new("Slow");
        let mut rx = group.add_peer(peer).await;

        for i in 0..5u8 {
            group.broadcast_raw(Uuid::nil(), vec![i]);
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        assert_eq!(rx.recv().await.unwrap().bytes, vec![3]);
        assert_eq!(rx.recv().await.unwrap().bytes, vec![4]);
    }

    #[tokio::test]
    async fn test_room_manager_get_or_create() {
        let manager = RoomManager::new(16);

        let room1 = manager.get_or_create("room-1").await;
        let room2 = manager.get_or_create("room-1").await;

        assert!(Arc::ptr_eq(&room1, &room2));
        assert_eq!(manager.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_room_manager_join_and_leave() {
        let manager = RoomManager::new(16);
        let alice = PeerInfo::new("Alice");
        let bob = PeerInfo::new("Bob");

        let (room, _rx_a) = manager.join("room-1", alice.clone(), 10).await.unwrap();
        let (same, _rx_b) = manager.join("room-1", bob.clone(), 10).await.unwrap();
        assert!(Arc::ptr_eq(&room, &same));
        assert_eq!(room.peer_count().await, 2);

        let (_, removed) = manager.leave("room-1", &alice.peer_id).await;
        assert!(!removed);
        let (_, removed) = manager.leave("room-1", &bob.peer_id).await;
        assert!(removed);
        assert_eq!(manager.room_count().await, 0);

        let (left, removed) = manager.leave("room-1", &bob.peer_id).await;
        assert!(left.is_none() && !removed);
    }

    #[tokio::test]
    async fn test_room_manager_rejects_full_room() {
        let manager = RoomManager::new(16);
        let _first = manager.join("room-1", PeerInfo::new("A"), 1).await.unwrap();

        let err = manager.join("room-1", PeerInfo::new("B"), 1).await.unwrap_err();
        assert_eq!(
            err,
            ProtocolError::RoomFull {
                room_id: "room-1".into(),
                max_peers: 1
            }
        );
    }

    #[tokio::test]
    async fn test_zero_capacity_room_is_not_left_behind() {
        let manager = RoomManager::new(16);
        assert!(manager.join("room-1", PeerInfo::new("A"), 0).await.is_err());
        assert_eq!(manager.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_room_manager_isolation() {
        let manager = RoomManager::new(16);

        let (_room1, mut rx1) = manager.join("room-1", PeerInfo::new("A"), 10).await.unwrap();
        let (room2, _rx2) = manager.join("room-2", PeerInfo::new("B"), 10).await.unwrap();

        room2.broadcast_raw(Uuid::new_v4(), vec![1, 2, 3]);
        assert!(matches!(
            rx1.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_remove_if_empty() {
        let manager = RoomManager::new(16);
        let room = manager.get_or_create("room-1").await;
        let peer = PeerInfo::new("Alice");
        let peer_id = peer.peer_id;
        let _rx = room.add_peer(peer).await;

        assert!(!manager.remove_if_empty("room-1").await);
        room.remove_peer(&peer_id).await;
        assert!(manager.remove_if_empty("room-1").await);
        assert!(manager.active_rooms().await.is_empty());
    }
}
