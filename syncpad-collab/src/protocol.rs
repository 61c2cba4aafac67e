//! Binary relay protocol.
//!
//! Wire format (bincode, standard config):
//! ```text
//! ┌──────────┬───────────┬──────────┬──────────┐
//! │ msg_type │ peer_id   │ room_id  │ payload  │
//! │ 1 byte   │ 16 bytes  │ varint+n │ varint+n │
//! └──────────┴───────────┴──────────┴──────────┘
//! ```
//!
//! `CodeChange` payloads are bincode-encoded [`SyncMessage`]s, so the full
//! document text travels inside the envelope.

use serde::{Deserialize, Serialize};
use syncpad_core::SyncMessage;
use uuid::Uuid;

/// Message types for the relay protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// First message from a client: enter a room
    Join = 1,
    /// Whole-document snapshot
    CodeChange = 2,
    /// Peer joined notification
    PeerJoined = 3,
    /// Peer left notification
    PeerLeft = 4,
    /// Heartbeat ping
    Ping = 5,
    /// Heartbeat pong
    Pong = 6,
}

/// Peer identity with a display name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerInfo {
    pub peer_id: Uuid,
    pub name: String,
}

impl PeerInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), name)
    }

    /// Create with explicit peer_id (for testing)
    pub fn with_id(peer_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            peer_id,
            name: name.into(),
        }
    }
}

/// Top-level frame exchanged between clients and the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    pub msg_type: MessageType,
    pub peer_id: Uuid,
    pub room_id: String,
    /// Message payload (varies by msg_type)
    pub payload: Vec<u8>,
}

impl Envelope {
    fn empty(msg_type: MessageType, peer_id: Uuid, room_id: impl Into<String>) -> Self {
        Self {
            msg_type,
            peer_id,
            room_id: room_id.into(),
            payload: Vec::new(),
        }
    }

    fn with_payload<T: Serialize>(
        msg_type: MessageType,
        peer_id: Uuid,
        room_id: impl Into<String>,
        value: &T,
    ) -> Result<Self, ProtocolError> {
        let payload = bincode::serde::encode_to_vec(value, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))?;
        Ok(Self {
            msg_type,
            peer_id,
            room_id: room_id.into(),
            payload,
        })
    }

    /// Request to enter `room_id`.
    pub fn join(info: &PeerInfo, room_id: impl Into<String>) -> Result<Self, ProtocolError> {
        Self::with_payload(MessageType::Join, info.peer_id, room_id, info)
    }

    /// Whole-document snapshot. The envelope's room is the message's room.
    pub fn code_change(peer_id: Uuid, msg: &SyncMessage) -> Result<Self, ProtocolError> {
        Self::with_payload(MessageType::CodeChange, peer_id, msg.room_id.clone(), msg)
    }

    /// Create a peer joined notification.
    pub fn peer_joined(info: &PeerInfo, room_id: impl Into<String>) -> Result<Self, ProtocolError> {
        Self::with_payload(MessageType::PeerJoined, info.peer_id, room_id, info)
    }

    /// Create a peer left notification.
    pub fn peer_left(peer_id: Uuid, room_id: impl Into<String>) -> Self {
        Self::empty(MessageType::PeerLeft, peer_id, room_id)
    }

    pub fn ping(peer_id: Uuid) -> Self {
        Self::empty(MessageType::Ping, peer_id, "")
    }

    pub fn pong(peer_id: Uuid) -> Self {
        Self::empty(MessageType::Pong, peer_id, "")
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }

    fn decode_payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        let (value, _) = bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(value)
    }

    /// Parse the snapshot carried by a `CodeChange`.
    pub fn sync_message(&self) -> Result<SyncMessage, ProtocolError> {
        if self.msg_type != MessageType::CodeChange {
            return Err(ProtocolError::InvalidMessageType);
        }
        self.decode_payload()
    }

    /// Parse peer info payload of a `Join` or `PeerJoined`.
    pub fn peer_info(&self) -> Result<PeerInfo, ProtocolError> {
        if !matches!(self.msg_type, MessageType::Join | MessageType::PeerJoined) {
            return Err(ProtocolError::InvalidMessageType);
        }
        self.decode_payload()
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    InvalidMessageType,
    ConnectionClosed,
    RoomFull { room_id: String, max_peers: usize },
    Transport(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::InvalidMessageType => write!(f, "Invalid message type"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::RoomFull { room_id, max_peers } => {
                write!(f, "Room {room_id} is full ({max_peers} peers)")
            }
            Self::Transport(e) => write!(f, "Transport error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<tokio_tungstenite::tungstenite::Error> for ProtocolError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
