//! Shared text document replica with origin-tagged change notifications.
//!
//! A `Document` holds the full text of one room's file. Every replacement
//! notifies subscribers with a [`ChangeEvent`] carrying the resulting text and
//! the [`ChangeOrigin`] that produced it, so sync code can tell keystrokes
//! apart from snapshots applied off the wire.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Where a document change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOrigin {
    /// User-driven edit made on this replica
    Local,
    /// Programmatic replacement with a remote snapshot
    Applied,
}

/// Notification delivered to document listeners after every replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Full document text after the change
    pub text: String,
    pub origin: ChangeOrigin,
    /// Local revision counter after the change (never sent over the wire)
    pub revision: u64,
}

/// Handle returned by [`Document::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

#[derive(Debug, Default)]
struct DocumentState {
    text: String,
    revision: u64,
}

/// One replica of a shared document.
///
/// Thread-safe; share it as `Arc<Document>`. Listeners run after the text
/// lock is released, so they may read or even mutate the document.
pub struct Document {
    state: Mutex<DocumentState>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

impl Document {
    /// Create a document with the given initial text at revision 0.
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(DocumentState {
                text: initial.into(),
                revision: 0,
            }),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Current full text.
    pub fn text(&self) -> String {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .text
            .clone()
    }

    /// Number of replacements applied so far.
    pub fn revision(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .revision
    }

    /// Replace the text as a local, user-authored edit.
    pub fn edit(&self, text: impl Into<String>) -> ChangeEvent {
        self.replace(text.into(), ChangeOrigin::Local)
    }

    /// Replace the text with a snapshot received from a peer.
    ///
    /// The resulting event is tagged [`ChangeOrigin::Applied`]. Applying the
    /// current text again leaves the content untouched.
    pub fn apply_remote(&self, text: impl Into<String>) -> ChangeEvent {
        self.replace(text.into(), ChangeOrigin::Applied)
    }

    fn replace(&self, text: String, origin: ChangeOrigin) -> ChangeEvent {
        let event = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.text = text;
            state.revision += 1;
            ChangeEvent {
                text: state.text.clone(),
                origin,
                revision: state.revision,
            }
        };

        // Snapshot the listener list so callbacks can subscribe/unsubscribe.
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        log::trace!(
            "document revision {} ({:?}), notifying {} listeners",
            event.revision,
            origin,
            listeners.len()
        );

        for listener in listeners {
            listener(&event);
        }
        event
    }

    /// Register a change listener.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Document")
            .field("revision", &state.revision)
            .field("len", &state.text.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_document() {
        let doc = Document::new("hello");
        assert_eq!(doc.text(), "hello");
        assert_eq!(doc.revision(), 0);
        assert_eq!(doc.listener_count(), 0);
    }

    #[test]
    fn test_edit_tags_local() {
        let doc = Document::default();
        let event = doc.edit("x = 1");
        assert_eq!(event.origin, ChangeOrigin::Local);
        assert_eq!(event.text, "x = 1");
        assert_eq!(event.revision, 1);
        assert_eq!(doc.text(), "x = 1");
    }

    #[test]
    fn test_apply_remote_tags_applied() {
        let doc = Document::new("old");
        let event = doc.apply_remote("new");
        assert_eq!(event.origin, ChangeOrigin::Applied);
        assert_eq!(doc.text(), "new");
    }

    #[test]
    fn test_listeners_receive_events() {
        let doc = Document::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        doc.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

        doc.edit("a");
        doc.apply_remote("b");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].origin, ChangeOrigin::Local);
        assert_eq!(seen[1].origin, ChangeOrigin::Applied);
        assert_eq!(seen[1].text, "b");
    }

    #[test]
    fn test_unsubscribe() {
        let doc = Document::default();
        let count = Arc::new(AtomicU64::new(0));
        let counter = count.clone();
        let id = doc.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        doc.edit("one");
        assert!(doc.unsubscribe(id));
        assert!(!doc.unsubscribe(id));
        doc.edit("two");

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(doc.listener_count(), 0);
    }

    #[test]
    fn test_apply_same_text_twice_is_stable() {
        let doc = Document::new("seed");
        let first = doc.apply_remote("same");
        let second = doc.apply_remote("same");
        assert_eq!(doc.text(), "same");
        assert_eq!(first.origin, second.origin);
        assert_eq!(second.revision, first.revision + 1);
    }

    #[test]
    fn test_listener_may_reenter_document() {
        let doc = Arc::new(Document::default());
        let weak = Arc::downgrade(&doc);
        let observed = Arc::new(Mutex::new(String::new()));
        let out = observed.clone();
        doc.subscribe(move |_| {
            if let Some(doc) = weak.upgrade() {
                *out.lock().unwrap() = doc.text();
            }
        });

        doc.edit("reentrant");
        assert_eq!(*observed.lock().unwrap(), "reentrant");
    }
}
