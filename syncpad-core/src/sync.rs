//! Whole-document synchronization between a local replica and a room channel.
//!
//! ```text
//!   Document ──ChangeEvent{Local}──► SyncChannel ──emit(CODE_CHANGE)──► Channel
//!      ▲                                 │
//!      └──apply_remote (Applied)─────────┘◄──on(CODE_CHANGE)─────────── Channel
//! ```
//!
//! Events tagged [`ChangeOrigin::Applied`] are never re-emitted, which is what
//! stops two peers from echoing a snapshot back and forth forever.
//!
//! Reference: Kleppmann, Chapter 5: Replication (last-write-wins)

use std::sync::{Arc, PoisonError, RwLock, Weak};

use crate::channel::{Channel, EventKind, Handler, SyncMessage};
use crate::document::{ChangeEvent, ChangeOrigin, Document, ListenerId};

/// State shared with the callbacks registered on the document and channel.
///
/// Callbacks hold a `Weak` reference so they never keep a detached session alive.
struct Shared {
    room_id: String,
    document: RwLock<Option<Arc<Document>>>,
    channel: RwLock<Option<Arc<dyn Channel>>>,
}

impl Shared {
    fn on_document_change(&self, event: &ChangeEvent) {
        match event.origin {
            ChangeOrigin::Applied => {
                log::trace!(
                    "room {}: revision {} applied from remote, not re-broadcast",
                    self.room_id,
                    event.revision
                );
            }
            ChangeOrigin::Local => self.broadcast(&event.text),
        }
    }

    fn broadcast(&self, text: &str) {
        let channel = self
            .channel
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let Some(channel) = channel else {
            log::debug!("room {}: no channel attached, local edit not sent", self.room_id);
            return;
        };

        let msg = SyncMessage::code_change(self.room_id.as_str(), text);
        if let Err(e) = channel.emit(EventKind::CodeChange, &msg) {
            log::warn!("room {}: failed to send code change: {e}", self.room_id);
        }
    }

    fn on_remote(&self, msg: SyncMessage) {
        if msg.room_id != self.room_id {
            log::debug!(
                "room {}: ignoring code change addressed to room {}",
                self.room_id,
                msg.room_id
            );
            return;
        }

        let Some(code) = msg.code else {
            log::debug!("room {}: code change without code, ignored", self.room_id);
            return;
        };

        let document = self
            .document
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match document {
            Some(document) => {
                document.apply_remote(code);
            }
            None => log::debug!("room {}: no document attached, remote code dropped", self.room_id),
        }
    }
}

/// Keeps one [`Document`] replica in step with its room.
///
/// Created per session; dropping it (or calling [`detach`](Self::detach))
/// removes every callback it registered.
pub struct SyncChannel {
    shared: Arc<Shared>,
    subscription: Option<(Arc<Document>, ListenerId)>,
    remote: Option<Arc<dyn Channel>>,
}

impl SyncChannel {
    /// Create an unattached sync channel for a room.
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                room_id: room_id.into(),
                document: RwLock::new(None),
                channel: RwLock::new(None),
            }),
            subscription: None,
            remote: None,
        }
    }

    /// Convenience: create and attach in one go.
    pub fn connect(
        room_id: impl Into<String>,
        document: Arc<Document>,
        channel: Arc<dyn Channel>,
    ) -> Self {
        let mut sync = Self::new(room_id);
        sync.attach_local_edit_source(document);
        sync.attach_remote_listener(Some(channel));
        sync
    }

    pub fn room_id(&self) -> &str {
        &self.shared.room_id
    }

    /// Listen to local edits on `document` and forward them to the channel.
    ///
    /// `document` also becomes the target of remote snapshots. Attaching a
    /// new document releases the previous subscription.
    pub fn attach_local_edit_source(&mut self, document: Arc<Document>) {
        self.release_document();

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let id = document.subscribe(move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.on_document_change(event);
            }
        });

        *self
            .shared
            .document
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(document.clone());
        self.subscription = Some((document, id));
        log::debug!("room {}: local edit source attached", self.shared.room_id);
    }

    /// Register the inbound `CODE_CHANGE` handler on `channel`.
    ///
    /// `None` (channel not created yet) is a no-op; call again once the
    /// channel exists. A previously attached channel is released first, so
    /// reconnecting never leaves a duplicate handler behind.
    pub fn attach_remote_listener(&mut self, channel: Option<Arc<dyn Channel>>) {
        let Some(channel) = channel else {
            log::debug!(
                "room {}: channel not available yet, remote listener deferred",
                self.shared.room_id
            );
            return;
        };

        self.release_channel();

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let handler: Handler = Arc::new(move |msg| {
            if let Some(shared) = weak.upgrade() {
                shared.on_remote(msg);
            }
        });
        channel.on(EventKind::CodeChange, handler);

        *self
            .shared
            .channel
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(channel.clone());
        self.remote = Some(channel);
        log::debug!("room {}: remote listener attached", self.shared.room_id);
    }

    /// Deregister from both the channel and the document. Idempotent.
    pub fn detach(&mut self) {
        let had_channel = self.remote.is_some();
        let had_document = self.subscription.is_some();
        self.release_channel();
        self.release_document();
        if had_channel || had_document {
            log::debug!("room {}: sync channel detached", self.shared.room_id);
        }
    }

    /// Whether a remote listener is currently registered.
    pub fn is_remote_attached(&self) -> bool {
        self.remote.is_some()
    }

    /// Whether a local edit source is currently attached.
    pub fn is_local_attached(&self) -> bool {
        self.subscription.is_some()
    }

    fn release_channel(&mut self) {
        if let Some(channel) = self.remote.take() {
            channel.off(EventKind::CodeChange);
        }
        *self
            .shared
            .channel
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn release_document(&mut self) {
        if let Some((document, id)) = self.subscription.take() {
            document.unsubscribe(id);
        }
        *self
            .shared
            .document
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl Drop for SyncChannel {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for SyncChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncChannel")
            .field("room_id", &self.shared.room_id)
            .field("local_attached", &self.is_local_attached())
            .field("remote_attached", &self.is_remote_attached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Channel double that records emits and lets tests inject inbound messages.
    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<(EventKind, SyncMessage)>>,
        handlers: Mutex<HashMap<EventKind, Handler>>,
        off_calls: Mutex<usize>,
    }

    impl RecordingChannel {
        fn inject(&self, msg: SyncMessage) {
            let handler = self.handlers.lock().unwrap().get(&EventKind::CodeChange).cloned();
            if let Some(handler) = handler {
                handler(msg);
            }
        }

        fn sent(&self) -> Vec<SyncMessage> {
            self.sent.lock().unwrap().iter().map(|(_, m)| m.clone()).collect()
        }

        fn has_handler(&self) -> bool {
            self.handlers.lock().unwrap().contains_key(&EventKind::CodeChange)
        }
    }

    impl Channel for RecordingChannel {
        fn emit(&self, kind: EventKind, payload: &SyncMessage) -> Result<(), ChannelError> {
            self.sent.lock().unwrap().push((kind, payload.clone()));
            Ok(())
        }

        fn on(&self, kind: EventKind, handler: Handler) {
            self.handlers.lock().unwrap().insert(kind, handler);
        }

        fn off(&self, kind: EventKind) {
            *self.off_calls.lock().unwrap() += 1;
            self.handlers.lock().unwrap().remove(&kind);
        }
    }

    fn setup(room: &str) -> (Arc<Document>, Arc<RecordingChannel>, SyncChannel) {
        let doc = Arc::new(Document::default());
        let channel = Arc::new(RecordingChannel::default());
        let sync = SyncChannel::connect(room, doc.clone(), channel.clone());
        (doc, channel, sync)
    }

    #[test]
    fn test_local_edit_sends_one_message() {
        let (doc, channel, _sync) = setup("room-a");

        doc.edit("const x = 1;");

        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], SyncMessage::code_change("room-a", "const x = 1;"));
    }

    #[test]
    fn test_every_local_edit_is_sent_in_order() {
        let (doc, channel, _sync) = setup("room-a");

        for text in ["c", "co", "con", "cons"] {
            doc.edit(text);
        }

        let codes: Vec<_> = channel.sent().into_iter().filter_map(|m| m.code).collect();
        assert_eq!(codes, vec!["c", "co", "con", "cons"]);
    }

    #[test]
    fn test_remote_changes_are_not_rebroadcast() {
        let (doc, channel, _sync) = setup("room-a");

        for i in 0..10 {
            channel.inject(SyncMessage::code_change("room-a", format!("v{i}")));
        }

        assert_eq!(doc.text(), "v9");
        assert!(channel.sent().is_empty());
    }

    #[test]
    fn test_duplicate_delivery_is_idempotent() {
        let (doc, channel, _sync) = setup("room-a");
        let origins = Arc::new(Mutex::new(Vec::new()));
        let sink = origins.clone();
        doc.subscribe(move |event| sink.lock().unwrap().push(event.origin));

        let msg = SyncMessage::code_change("room-a", "let y = 2;");
        channel.inject(msg.clone());
        let once = doc.text();
        channel.inject(msg);

        assert_eq!(doc.text(), once);
        assert_eq!(
            *origins.lock().unwrap(),
            vec![ChangeOrigin::Applied, ChangeOrigin::Applied]
        );
        assert!(channel.sent().is_empty());
    }

    #[test]
    fn test_null_code_is_ignored() {
        let (doc, channel, _sync) = setup("room-a");
        doc.edit("keep me");
        let revision = doc.revision();

        channel.inject(SyncMessage {
            room_id: "room-a".into(),
            code: None,
        });

        assert_eq!(doc.text(), "keep me");
        assert_eq!(doc.revision(), revision);
    }

    #[test]
    fn test_other_room_is_ignored() {
        let (doc, channel, _sync) = setup("room-a");
        channel.inject(SyncMessage::code_change("room-b", "intruder"));
        assert_eq!(doc.text(), "");
    }

    #[test]
    fn test_attach_without_channel_is_noop() {
        let doc = Arc::new(Document::default());
        let mut sync = SyncChannel::new("room-a");
        sync.attach_local_edit_source(doc.clone());
        sync.attach_remote_listener(None);

        assert!(!sync.is_remote_attached());
        // Editing with no channel must not fault.
        doc.edit("offline edit");
        assert_eq!(doc.text(), "offline edit");
    }

    #[test]
    fn test_late_channel_attach() {
        let doc = Arc::new(Document::default());
        let mut sync = SyncChannel::new("room-a");
        sync.attach_local_edit_source(doc.clone());
        sync.attach_remote_listener(None);
        doc.edit("before");

        let channel = Arc::new(RecordingChannel::default());
        let channel_dyn: Arc<dyn Channel> = channel.clone();
        sync.attach_remote_listener(Some(channel_dyn));
        doc.edit("after");

        assert_eq!(channel.sent(), vec![SyncMessage::code_change("room-a", "after")]);
    }

    #[test]
    fn test_detach_releases_both_directions() {
        let (doc, channel, mut sync) = setup("room-a");
        sync.detach();

        assert!(!channel.has_handler());
        assert_eq!(doc.listener_count(), 0);
        doc.edit("unsent");
        assert!(channel.sent().is_empty());

        // Second detach is harmless.
        sync.detach();
        assert_eq!(*channel.off_calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_drop_detaches() {
        let (doc, channel, sync) = setup("room-a");
        drop(sync);
        assert!(!channel.has_handler());
        assert_eq!(doc.listener_count(), 0);
    }

    #[test]
    fn test_switching_channels_releases_previous() {
        let (doc, first, mut sync) = setup("room-a");
        let second = Arc::new(RecordingChannel::default());
        let second_dyn: Arc<dyn Channel> = second.clone();

        sync.attach_remote_listener(Some(second_dyn));

        assert!(!first.has_handler());
        assert!(second.has_handler());
        doc.edit("via second");
        assert!(first.sent().is_empty());
        assert_eq!(second.sent().len(), 1);
    }

    #[test]
    fn test_reattach_same_channel_keeps_single_handler() {
        let (doc, channel, mut sync) = setup("room-a");
        let channel_dyn: Arc<dyn Channel> = channel.clone();
        sync.attach_remote_listener(Some(channel_dyn.clone()));
        sync.attach_remote_listener(Some(channel_dyn));

        doc.edit("once");
        assert_eq!(channel.sent().len(), 1);
        assert!(channel.has_handler());
    }

    #[test]
    fn test_replacing_document_moves_subscription() {
        let (old_doc, channel, mut sync) = setup("room-a");
        let new_doc = Arc::new(Document::default());
        sync.attach_local_edit_source(new_doc.clone());

        assert_eq!(old_doc.listener_count(), 0);
        old_doc.edit("stale");
        assert!(channel.sent().is_empty());

        channel.inject(SyncMessage::code_change("room-a", "remote"));
        assert_eq!(new_doc.text(), "remote");
        assert_eq!(old_doc.text(), "stale");
    }
}
