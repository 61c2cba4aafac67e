//! Event kinds, the `CODE_CHANGE` payload and the channel primitive.
//!
//! The channel is whatever room-scoped transport the embedder provides
//! (an in-process [`LocalHub`](crate::hub::LocalHub), a WebSocket client, ...).
//! Delivery is at-least-once and unordered across senders.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Wire-level event kinds exchanged over a room channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Whole-document snapshot after an edit
    #[serde(rename = "CODE_CHANGE")]
    CodeChange,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CodeChange => "CODE_CHANGE",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `CODE_CHANGE` payload: `{ roomId, code }`.
///
/// `code` is optional so that a null or missing value survives decoding and
/// can be ignored by the receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
    pub room_id: String,
    #[serde(default)]
    pub code: Option<String>,
}

impl SyncMessage {
    /// Snapshot of the full document text for a room.
    pub fn code_change(room_id: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            code: Some(code.into()),
        }
    }
}

/// Inbound message handler registered with [`Channel::on`].
pub type Handler = Arc<dyn Fn(SyncMessage) + Send + Sync>;

/// Transport failures surfaced by [`Channel::emit`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,
    #[error("failed to encode {kind} payload: {reason}")]
    Encode { kind: EventKind, reason: String },
}

/// Room-scoped message transport.
///
/// `on` replaces any handler already registered for the kind; `off` removes
/// it. Implementations must not echo a message back to the endpoint that
/// emitted it.
pub trait Channel: Send + Sync {
    fn emit(&self, kind: EventKind, payload: &SyncMessage) -> Result<(), ChannelError>;

    fn on(&self, kind: EventKind, handler: Handler);

    fn off(&self, kind: EventKind);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_wire_name() {
        assert_eq!(EventKind::CodeChange.as_str(), "CODE_CHANGE");
        assert_eq!(EventKind::CodeChange.to_string(), "CODE_CHANGE");
        assert_eq!(
            serde_json::to_string(&EventKind::CodeChange).unwrap(),
            "\"CODE_CHANGE\""
        );
    }

    #[test]
    fn test_sync_message_json_shape() {
        let msg = SyncMessage::code_change("room-1", "let x = 1;");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["roomId"], "room-1");
        assert_eq!(json["code"], "let x = 1;");
    }

    #[test]
    fn test_null_code_decodes() {
        let msg: SyncMessage = serde_json::from_str(r#"{"roomId":"r","code":null}"#).unwrap();
        assert_eq!(msg.room_id, "r");
        assert!(msg.code.is_none());
    }

    #[test]
    fn test_missing_code_decodes() {
        let msg: SyncMessage = serde_json::from_str(r#"{"roomId":"r"}"#).unwrap();
        assert!(msg.code.is_none());
    }

    #[test]
    fn test_channel_error_display() {
        let err = ChannelError::Encode {
            kind: EventKind::CodeChange,
            reason: "too large".into(),
        };
        assert_eq!(err.to_string(), "failed to encode CODE_CHANGE payload: too large");
        assert_eq!(ChannelError::Closed.to_string(), "channel closed");
    }
}
