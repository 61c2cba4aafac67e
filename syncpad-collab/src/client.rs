//! WebSocket client channel.
//!
//! [`SocketChannel`] implements [`syncpad_core::Channel`] over a connection to
//! the relay server, so a [`SyncChannel`](syncpad_core::SyncChannel) can sit on
//! top of it unchanged.
//!
//! - `emit` never blocks: frames go through a bounded queue to a writer task
//! - while the queue is full or the socket is down, only the newest snapshot
//!   is kept and it is flushed as soon as there is room (or on reconnect)
//! - inbound `CodeChange` frames are decoded by a reader task and handed to
//!   the registered handler

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use futures_util::{SinkExt, StreamExt};
use syncpad_core::{Channel, ChannelError, EventKind, Handler, SyncMessage};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use crate::protocol::{Envelope, MessageType, PeerInfo, ProtocolError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Room activity reported to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Connected,
    Disconnected,
    PeerJoined(PeerInfo),
    PeerLeft(Uuid),
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Relay address, e.g. `ws://127.0.0.1:9090`
    pub server_url: String,
    pub room_id: String,
    /// Display name announced to the room
    pub name: String,
    /// Frames buffered for the writer task before coalescing kicks in
    pub outgoing_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:9090".to_string(),
            room_id: "default".to_string(),
            name: "anonymous".to_string(),
            outgoing_capacity: 256,
        }
    }
}

#[derive(Default)]
struct Outbox {
    sender: Option<mpsc::Sender<Vec<u8>>>,
    /// Newest snapshot that could not be queued
    pending: Option<SyncMessage>,
}

struct Shared {
    peer: PeerInfo,
    state: RwLock<ConnectionState>,
    handlers: RwLock<HashMap<EventKind, Handler>>,
    outbox: Mutex<Outbox>,
    events: mpsc::Sender<RelayEvent>,
    /// Bumped on every connect so a stale reader cannot tear down a newer connection
    generation: AtomicU64,
    /// Set when offline edits were flushed on connect; the room's initial
    /// snapshot is older than those edits and must not overwrite them
    skip_initial_snapshot: AtomicBool,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn outbox(&self) -> std::sync::MutexGuard<'_, Outbox> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, event: RelayEvent) {
        if let Err(e) = self.events.try_send(event) {
            log::trace!("relay event dropped: {e}");
        }
    }

    /// Queue a snapshot, or keep it as the pending one if it cannot be queued.
    fn queue_snapshot(&self, msg: &SyncMessage, bytes: Vec<u8>) {
        let mut outbox = self.outbox();
        let Some(sender) = outbox.sender.as_ref() else {
            log::debug!("room {}: offline, keeping latest snapshot", msg.room_id);
            outbox.pending = Some(msg.clone());
            return;
        };

        match sender.try_send(bytes) {
            Ok(()) => outbox.pending = None,
            Err(TrySendError::Full(_)) => {
                log::debug!("room {}: outgoing queue full, coalescing", msg.room_id);
                outbox.pending = Some(msg.clone());
            }
            Err(TrySendError::Closed(_)) => {
                outbox.sender = None;
                outbox.pending = Some(msg.clone());
            }
        }
    }

    fn take_pending(&self) -> Option<SyncMessage> {
        self.outbox().pending.take()
    }

    fn send_control(&self, envelope: Envelope) {
        let Ok(bytes) = envelope.encode() else {
            return;
        };
        if let Some(sender) = self.outbox().sender.as_ref() {
            let _ = sender.try_send(bytes);
        }
    }

    fn dispatch(&self, envelope: Envelope) {
        match envelope.msg_type {
            MessageType::CodeChange => {
                if envelope.peer_id == self.peer.peer_id {
                    return;
                }
                let msg = match envelope.sync_message() {
                    Ok(msg) => msg,
                    Err(e) => {
                        log::warn!("malformed CodeChange from {}: {e}", envelope.peer_id);
                        return;
                    }
                };
                if envelope.peer_id.is_nil() && self.skip_initial_snapshot.swap(false, Ordering::AcqRel) {
                    log::debug!("room {}: initial snapshot superseded by offline edits", msg.room_id);
                    return;
                }

                let handler = self
                    .handlers
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(&EventKind::CodeChange)
                    .cloned();
                match handler {
                    Some(handler) => handler(msg),
                    None => log::trace!("no CODE_CHANGE handler registered; frame dropped"),
                }
            }
            MessageType::PeerJoined => match envelope.peer_info() {
                Ok(info) => self.notify(RelayEvent::PeerJoined(info)),
                Err(e) => log::warn!("malformed PeerJoined: {e}"),
            },
            MessageType::PeerLeft => self.notify(RelayEvent::PeerLeft(envelope.peer_id)),
            MessageType::Ping => self.send_control(Envelope::pong(self.peer.peer_id)),
            MessageType::Pong => log::trace!("pong from relay"),
            MessageType::Join => log::debug!("unexpected Join from relay"),
        }
    }

    fn mark_disconnected(&self, generation: u64) {
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        self.outbox().sender = None;
        if self.state() != ConnectionState::Disconnected {
            self.set_state(ConnectionState::Disconnected);
            self.notify(RelayEvent::Disconnected);
        }
    }
}

/// [`Channel`] backed by a WebSocket connection to the relay.
pub struct SocketChannel {
    config: ClientConfig,
    shared: Arc<Shared>,
    event_rx: Mutex<Option<mpsc::Receiver<RelayEvent>>>,
}

impl SocketChannel {
    pub fn new(config: ClientConfig) -> Self {
        let (events, event_rx) = mpsc::channel(256);
        let peer = PeerInfo::new(config.name.clone());
        Self {
            config,
            shared: Arc::new(Shared {
                peer,
                state: RwLock::new(ConnectionState::Disconnected),
                handlers: RwLock::new(HashMap::new()),
                outbox: Mutex::new(Outbox::default()),
                events,
                generation: AtomicU64::new(0),
                skip_initial_snapshot: AtomicBool::new(false),
            }),
            event_rx: Mutex::new(Some(event_rx)),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&self) -> Option<mpsc::Receiver<RelayEvent>> {
        self.event_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Connect, join the configured room and flush any pending snapshot.
    ///
    /// Spawns a writer and a reader task; must be called inside a tokio runtime.
    pub async fn connect(&self) -> Result<(), ProtocolError> {
        self.shared.set_state(ConnectionState::Connecting);

        let ws: WsStream = match tokio_tungstenite::connect_async(self.config.server_url.as_str()).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                self.shared.set_state(ConnectionState::Disconnected);
                log::warn!("failed to connect to {}: {e}", self.config.server_url);
                return Err(e.into());
            }
        };
        let (ws_writer, ws_reader) = ws.split();

        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let (tx, rx) = mpsc::channel::<Vec<u8>>(self.config.outgoing_capacity.max(2));
        let join = Envelope::join(&self.shared.peer, self.config.room_id.clone())?.encode()?;

        {
            let mut outbox = self.shared.outbox();
            tx.try_send(join).map_err(|_| ProtocolError::ConnectionClosed)?;

            let mut flushed = false;
            if let Some(snapshot) = outbox.pending.take() {
                let bytes = Envelope::code_change(self.shared.peer.peer_id, &snapshot)?.encode()?;
                tx.try_send(bytes).map_err(|_| ProtocolError::ConnectionClosed)?;
                flushed = true;
                log::info!("room {}: flushed offline snapshot", snapshot.room_id);
            }
            self.shared
                .skip_initial_snapshot
                .store(flushed, Ordering::Release);

            outbox.sender = Some(tx);
            self.shared.set_state(ConnectionState::Connected);
        }

        tokio::spawn(write_loop(ws_writer, rx, self.shared.clone()));
        tokio::spawn(read_loop(ws_reader, self.shared.clone(), generation));

        log::info!(
            "{} ({}) connected to room {}",
            self.shared.peer.name,
            self.shared.peer.peer_id,
            self.config.room_id
        );
        self.shared.notify(RelayEvent::Connected);
        Ok(())
    }

    /// Close the connection. Later emits are kept as the pending snapshot.
    pub fn disconnect(&self) {
        let had_sender = self.shared.outbox().sender.take().is_some();
        if had_sender {
            self.shared.set_state(ConnectionState::Disconnected);
            self.shared.notify(RelayEvent::Disconnected);
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn peer_info(&self) -> &PeerInfo {
        &self.shared.peer
    }

    pub fn room_id(&self) -> &str {
        &self.config.room_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Snapshot waiting to be sent, if any.
    pub fn pending_snapshot(&self) -> Option<SyncMessage> {
        self.shared.outbox().pending.clone()
    }
}

impl Channel for SocketChannel {
    fn emit(&self, kind: EventKind, payload: &SyncMessage) -> Result<(), ChannelError> {
        let encode_error = |e: ProtocolError| ChannelError::Encode {
            kind,
            reason: e.to_string(),
        };
        let bytes = Envelope::code_change(self.shared.peer.peer_id, payload)
            .and_then(|envelope| envelope.encode())
            .map_err(encode_error)?;
        self.shared.queue_snapshot(payload, bytes);
        Ok(())
    }

    fn on(&self, kind: EventKind, handler: Handler) {
        self.shared
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, handler);
    }

    fn off(&self, kind: EventKind) {
        self.shared
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&kind);
    }
}

impl Drop for SocketChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for SocketChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketChannel")
            .field("peer", &self.shared.peer)
            .field("room_id", &self.config.room_id)
            .field("state", &self.connection_state())
            .finish()
    }
}

/// Forward queued frames to the socket, then any snapshot coalesced meanwhile.
async fn write_loop(
    mut sink: futures_util::stream::SplitSink<WsStream, Message>,
    mut rx: mpsc::Receiver<Vec<u8>>,
    shared: Arc<Shared>,
) {
    while let Some(bytes) = rx.recv().await {
        if sink.send(Message::Binary(bytes.into())).await.is_err() {
            break;
        }
        if !rx.is_empty() {
            continue;
        }
        if let Some(snapshot) = shared.take_pending() {
            let Ok(bytes) = Envelope::code_change(shared.peer.peer_id, &snapshot).and_then(|e| e.encode()) else {
                continue;
            };
            if sink.send(Message::Binary(bytes.into())).await.is_err() {
                shared.outbox().pending.get_or_insert(snapshot);
                break;
            }
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}

async fn read_loop(mut stream: futures_util::stream::SplitStream<WsStream>, shared: Arc<Shared>, generation: u64) {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Binary(data)) => {
                let bytes: Vec<u8> = data.into();
                match Envelope::decode(&bytes) {
                    Ok(envelope) => shared.dispatch(envelope),
                    Err(e) => log::warn!("failed to decode relay frame: {e}"),
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }
    shared.mark_disconnected(generation);
}
