//! # syncpad-core: Shared document replica and whole-document sync
//!
//! ```text
//! ┌──────────────┐  ChangeEvent{Local}   ┌──────────────┐  CODE_CHANGE  ┌─────────┐
//! │  Document    │ ────────────────────► │ SyncChannel  │ ────────────► │ Channel │
//! │  (replica)   │ ◄──────────────────── │ (per room)   │ ◄──────────── │ (room)  │
//! └──────────────┘  apply_remote(Applied)└──────────────┘   on/off      └─────────┘
//! ```
//!
//! Every local edit resends the full text; every inbound snapshot replaces the
//! local text. The last message received wins.
//!
//! ## Modules
//!
//! - [`document`]: Text replica with origin-tagged change listeners
//! - [`channel`]: `CODE_CHANGE` payload and the `Channel` transport trait
//! - [`sync`]: `SyncChannel`, the local ⇄ remote bridge with echo suppression
//! - [`hub`]: In-process room hub implementing `Channel`

pub mod document;
pub mod channel;
pub mod sync;
pub mod hub;

// Re-exports for convenience
pub use document::{ChangeEvent, ChangeOrigin, Document, ListenerId};
pub use channel::{Channel, ChannelError, EventKind, Handler, SyncMessage};
pub use sync::SyncChannel;
pub use hub::{HubEndpoint, LocalHub};
