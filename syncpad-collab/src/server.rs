//! WebSocket relay server with room-based routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── Room (room_id) ── latest code ── BroadcastGroup
//! Client B ──┘                                        │
//!                                          ┌──────────┼───────────┐
//!                                          ▼          ▼           ▼
//!                                       Client A   Client B    Client C
//!                                       (skipped: own frame)
//! ```
//!
//! The relay holds no document model of its own. It remembers the last
//! `CodeChange` text per room so that a late joiner starts from the current
//! state, and forwards every snapshot to the other peers unchanged.

use std::net::SocketAddr;
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::{BroadcastGroup, Frame, RoomManager};
use crate::protocol::{Envelope, MessageType, PeerInfo, ProtocolError};

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum peers per room
    pub max_peers_per_room: usize,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            max_peers_per_room: 100,
            broadcast_capacity: 256,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub rejected_joins: u64,
    pub active_rooms: usize,
}

/// Room membership of one connection, set by its `Join`.
struct Membership {
    peer: PeerInfo,
    room_id: String,
    room: Arc<BroadcastGroup>,
    rx: broadcast::Receiver<Arc<Frame>>,
}

type WsSink = futures_util::stream::SplitSink<tokio_tungstenite::WebSocketStream<TcpStream>, Message>;

/// The relay server.
pub struct RelayServer {
    config: ServerConfig,
    rooms: Arc<RoomManager>,
    stats: Arc<RwLock<ServerStats>>,
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> Self {
        let rooms = Arc::new(RoomManager::new(config.broadcast_capacity));
        Self {
            config,
            rooms,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind `config.bind_addr` and serve until the listener fails.
    pub async fn run(&self) -> Result<(), ProtocolError> {
        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|e| ProtocolError::Transport(format!("bind {}: {e}", self.config.bind_addr)))?;
        self.serve(listener).await
    }

    /// Accept connections from an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ProtocolError> {
        match listener.local_addr() {
            Ok(addr) => log::info!("Relay server listening on {addr}"),
            Err(_) => log::info!("Relay server listening on {}", self.config.bind_addr),
        }

        loop {
            let (stream, addr) = listener
                .accept()
                .await
                .map_err(|e| ProtocolError::Transport(e.to_string()))?;
            log::debug!("New TCP connection from {addr}");

            let rooms = self.rooms.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, rooms, stats, config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        rooms: Arc<RoomManager>,
        stats: Arc<RwLock<ServerStats>>,
        config: ServerConfig,
    ) -> Result<(), ProtocolError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr}");
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let mut membership: Option<Membership> = None;
        let result = loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            {
                                let mut s = stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += bytes.len() as u64;
                            }
                            let envelope = match Envelope::decode(&bytes) {
                                Ok(envelope) => envelope,
                                Err(e) => {
                                    log::warn!("Failed to decode message from {addr}: {e}");
                                    continue;
                                }
                            };

                            let step = Self::handle_envelope(
                                envelope, bytes, &mut membership, &mut ws_sender, &rooms, &stats, &config,
                            )
                            .await;
                            if let Err(e) = step {
                                break Err(e);
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break Ok(());
                        }

                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = ws_sender.send(Message::Pong(data)).await {
                                break Err(e.into());
                            }
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break Ok(());
                        }

                        _ => {}
                    }
                }

                frame = async {
                    match membership.as_mut() {
                        Some(m) => m.rx.recv().await,
                        // Not joined yet: nothing to forward
                        None => std::future::pending().await,
                    }
                } => {
                    let own_id = membership.as_ref().map(|m| m.peer.peer_id);
                    match frame {
                        Ok(frame) => {
                            if Some(frame.sender) == own_id {
                                continue;
                            }
                            if let Err(e) = ws_sender.send(Message::Binary(frame.bytes.clone().into())).await {
                                break Err(e.into());
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("Peer {own_id:?} lagged by {n} frames");
                        }
                        Err(broadcast::error::RecvError::Closed) => break Ok(()),
                    }
                }
            }
        };

        if let Some(m) = membership {
            let (left, removed) = rooms.leave(&m.room_id, &m.peer.peer_id).await;
            if let Some(room) = left {
                if !removed {
                    let _ = room.broadcast(&Envelope::peer_left(m.peer.peer_id, m.room_id.clone()));
                }
            }
            if removed {
                log::info!("Room {} removed (empty)", m.room_id);
            }
            log::info!("Peer {} ({}) left room {}", m.peer.name, m.peer.peer_id, m.room_id);
        }

        let room_count = rooms.room_count().await;
        let mut s = stats.write().await;
        s.active_connections = s.active_connections.saturating_sub(1);
        s.active_rooms = room_count;

        result
    }

    async fn handle_envelope(
        envelope: Envelope,
        bytes: Vec<u8>,
        membership: &mut Option<Membership>,
        ws_sender: &mut WsSink,
        rooms: &RoomManager,
        stats: &RwLock<ServerStats>,
        config: &ServerConfig,
    ) -> Result<(), ProtocolError> {
        match envelope.msg_type {
            MessageType::Join => {
                if membership.is_some() {
                    log::debug!("Ignoring repeated join from {}", envelope.peer_id);
                    return Ok(());
                }
                let info = envelope
                    .peer_info()
                    .unwrap_or_else(|_| PeerInfo::with_id(envelope.peer_id, "Anonymous"));
                let room_id = envelope.room_id.clone();

                let (room, rx) = match rooms.join(&room_id, info.clone(), config.max_peers_per_room).await {
                    Ok(joined) => joined,
                    Err(e) => {
                        log::warn!("Rejecting {} ({}): {e}", info.name, info.peer_id);
                        stats.write().await.rejected_joins += 1;
                        let _ = ws_sender.send(Message::Close(None)).await;
                        return Err(e);
                    }
                };

                // Bring the newcomer up to date before anything else reaches it
                if let Some(code) = room.latest_code().await {
                    let snapshot = syncpad_core::SyncMessage::code_change(room_id.clone(), code);
                    let encoded = Envelope::code_change(Uuid::nil(), &snapshot)?.encode()?;
                    ws_sender.send(Message::Binary(encoded.into())).await?;
                }

                let _ = room.broadcast(&Envelope::peer_joined(&info, room_id.clone())?);
                stats.write().await.active_rooms = rooms.room_count().await;

                log::info!("Peer {} ({}) joined room {}", info.name, info.peer_id, room_id);
                *membership = Some(Membership {
                    peer: info,
                    room_id,
                    room,
                    rx,
                });
            }

            MessageType::CodeChange => {
                let Some(m) = membership.as_ref() else {
                    log::warn!("CodeChange from {} before join; dropped", envelope.peer_id);
                    return Ok(());
                };
                if envelope.room_id != m.room_id {
                    log::debug!(
                        "CodeChange for room {} on a connection joined to {}; dropped",
                        envelope.room_id,
                        m.room_id
                    );
                    return Ok(());
                }

                match envelope.sync_message() {
                    Ok(msg) => {
                        if let Some(code) = msg.code {
                            m.room.set_latest_code(code).await;
                        }
                    }
                    Err(e) => {
                        log::warn!("Malformed CodeChange from {}: {e}", m.peer.peer_id);
                        return Ok(());
                    }
                }

                // Relay the original bytes; the sender id is the joined peer's
                m.room.broadcast_raw(m.peer.peer_id, bytes);
            }

            MessageType::Ping => {
                let pong = Envelope::pong(Uuid::nil()).encode()?;
                ws_sender.send(Message::Binary(pong.into())).await?;
            }

            other => {
                log::debug!("Unhandled message type from client: {other:?}");
            }
        }
        Ok(())
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn rooms(&self) -> &Arc<RoomManager> {
        &self.rooms
    }
}
