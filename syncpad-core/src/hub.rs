//! In-process room hub.
//!
//! Each [`HubEndpoint`] is one peer's view of a room. Emitting on an endpoint
//! delivers the message synchronously to every *other* live endpoint in the
//! same room, mirroring what the WebSocket relay does over the network.
//! Used by tests and by embedders that host several replicas in one process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use uuid::Uuid;

use crate::channel::{Channel, ChannelError, EventKind, Handler, SyncMessage};

/// Room registry for in-process endpoints.
#[derive(Default)]
pub struct LocalHub {
    rooms: Mutex<HashMap<String, Vec<Weak<HubEndpoint>>>>,
}

impl LocalHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Join a room, returning a fresh endpoint for it.
    pub fn join(self: &Arc<Self>, room_id: impl Into<String>) -> Arc<HubEndpoint> {
        let room_id = room_id.into();
        let endpoint = Arc::new(HubEndpoint {
            peer_id: Uuid::new_v4(),
            room_id: room_id.clone(),
            hub: self.clone(),
            handlers: RwLock::new(HashMap::new()),
            emitted: AtomicU64::new(0),
        });

        let mut rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        rooms
            .entry(room_id.clone())
            .or_default()
            .push(Arc::downgrade(&endpoint));
        log::debug!("peer {} joined local room {room_id}", endpoint.peer_id);
        endpoint
    }

    /// Live endpoints in a room.
    pub fn peer_count(&self, room_id: &str) -> usize {
        let rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        rooms
            .get(room_id)
            .map_or(0, |peers| peers.iter().filter(|p| p.strong_count() > 0).count())
    }

    /// Number of rooms with at least one registered endpoint.
    pub fn room_count(&self) -> usize {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Prune endpoints that have been dropped.
    fn prune(&self, room_id: &str) {
        let mut rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(peers) = rooms.get_mut(room_id) {
            peers.retain(|p| p.strong_count() > 0);
            if peers.is_empty() {
                rooms.remove(room_id);
            }
        }
    }

    /// Fan a message out to every other endpoint in the room.
    ///
    /// Handlers are collected first and invoked without holding the room lock.
    fn deliver(&self, from: Uuid, room_id: &str, kind: EventKind, payload: &SyncMessage) -> usize {
        let recipients: Vec<Arc<HubEndpoint>> = {
            let mut rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(peers) = rooms.get_mut(room_id) else {
                return 0;
            };
            peers.retain(|p| p.strong_count() > 0);
            peers
                .iter()
                .filter_map(Weak::upgrade)
                .filter(|p| p.peer_id != from)
                .collect()
        };

        let mut delivered = 0;
        for peer in recipients {
            if let Some(handler) = peer.handler(kind) {
                handler(payload.clone());
                delivered += 1;
            }
        }
        delivered
    }
}

/// One peer's connection to a [`LocalHub`] room.
pub struct HubEndpoint {
    peer_id: Uuid,
    room_id: String,
    hub: Arc<LocalHub>,
    handlers: RwLock<HashMap<EventKind, Handler>>,
    emitted: AtomicU64,
}

impl HubEndpoint {
    pub fn peer_id(&self) -> Uuid {
        self.peer_id
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Total messages emitted by this endpoint.
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    fn handler(&self, kind: EventKind) -> Option<Handler> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
    }
}

impl Channel for HubEndpoint {
    fn emit(&self, kind: EventKind, payload: &SyncMessage) -> Result<(), ChannelError> {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        let delivered = self.hub.deliver(self.peer_id, &self.room_id, kind, payload);
        log::trace!("{kind} from {} delivered to {delivered} peers", self.peer_id);
        Ok(())
    }

    fn on(&self, kind: EventKind, handler: Handler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, handler);
    }

    fn off(&self, kind: EventKind) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&kind);
    }
}

impl Drop for HubEndpoint {
    fn drop(&mut self) {
        self.hub.prune(&self.room_id);
        log::debug!("peer {} left local room {}", self.peer_id, self.room_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Handler, Arc<Mutex<Vec<SyncMessage>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let handler: Handler = Arc::new(move |msg| sink.lock().unwrap().push(msg));
        (handler, received)
    }

    #[test]
    fn test_join_and_count() {
        let hub = LocalHub::new();
        let _a = hub.join("room");
        let _b = hub.join("room");
        let _c = hub.join("other");

        assert_eq!(hub.peer_count("room"), 2);
        assert_eq!(hub.peer_count("other"), 1);
        assert_eq!(hub.room_count(), 2);
    }

    #[test]
    fn test_emit_skips_sender() {
        let hub = LocalHub::new();
        let a = hub.join("room");
        let b = hub.join("room");
        let (handler_a, got_a) = recorder();
        let (handler_b, got_b) = recorder();
        a.on(EventKind::CodeChange, handler_a);
        b.on(EventKind::CodeChange, handler_b);

        a.emit(EventKind::CodeChange, &SyncMessage::code_change("room", "hi"))
            .unwrap();

        assert!(got_a.lock().unwrap().is_empty());
        assert_eq!(got_b.lock().unwrap().len(), 1);
        assert_eq!(a.emitted(), 1);
        assert_eq!(b.emitted(), 0);
    }

    #[test]
    fn test_rooms_are_isolated() {
        let hub = LocalHub::new();
        let a = hub.join("one");
        let b = hub.join("two");
        let (handler, got) = recorder();
        b.on(EventKind::CodeChange, handler);

        a.emit(EventKind::CodeChange, &SyncMessage::code_change("one", "x"))
            .unwrap();

        assert!(got.lock().unwrap().is_empty());
    }

    #[test]
    fn test_off_stops_delivery() {
        let hub = LocalHub::new();
        let a = hub.join("room");
        let b = hub.join("room");
        let (handler, got) = recorder();
        b.on(EventKind::CodeChange, handler);
        b.off(EventKind::CodeChange);

        a.emit(EventKind::CodeChange, &SyncMessage::code_change("room", "x"))
            .unwrap();

        assert!(got.lock().unwrap().is_empty());
    }

    #[test]
    fn test_dropped_endpoint_leaves_room() {
        let hub = LocalHub::new();
        let a = hub.join("room");
        let b = hub.join("room");
        drop(b);

        assert_eq!(hub.peer_count("room"), 1);
        drop(a);
        assert_eq!(hub.peer_count("room"), 0);
        assert_eq!(hub.room_count(), 0);
    }
}
