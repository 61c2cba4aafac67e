//! # syncpad-collab: WebSocket relay for shared code rooms
//!
//! ```text
//! ┌───────────────┐     WebSocket      ┌──────────────┐
//! │ SocketChannel │ ◄─────────────────► │ RelayServer  │
//! │ (per user)    │   bincode frames    │ (central)    │
//! └──────┬────────┘                     └──────┬───────┘
//!        │ impl Channel                        │
//!        ▼                                     ▼
//! ┌───────────────┐                     ┌───────────────┐
//! │ SyncChannel   │                     │ RoomManager   │
//! │ + Document    │                     │ BroadcastGroup│
//! └───────────────┘                     │ + latest code │
//!                                       └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Binary wire protocol (bincode-encoded `Envelope`)
//! - [`broadcast`]: Room-based fan-out with backpressure
//! - [`server`]: WebSocket relay server
//! - [`client`]: WebSocket client implementing the core `Channel`

pub mod protocol;
pub mod broadcast;
pub mod server;
pub mod client;

// Re-exports for convenience
pub use protocol::{Envelope, MessageType, PeerInfo, ProtocolError};
pub use broadcast::{BroadcastGroup, BroadcastStats, Frame, RoomManager};
pub use server::{RelayServer, ServerConfig, ServerStats};
pub use client::{ClientConfig, ConnectionState, RelayEvent, SocketChannel};
