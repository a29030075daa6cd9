use std::cmp::Ordering;

use tracing::warn;

use super::ChatMessage;
use crate::store::Snapshot;

/// Locally materialized, totally ordered view of the messages collection.
///
/// Each snapshot fully replaces the previous view, so the visible order is
/// a pure function of the latest snapshot and replaying one is a no-op.
/// Messages whose server timestamp has not been assigned yet sort last
/// until a later snapshot resolves them.
#[derive(Debug, Default)]
pub struct Timeline {
    messages: Vec<ChatMessage>,
    loaded: bool,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_snapshot(&mut self, snapshot: &Snapshot) {
        let mut messages: Vec<ChatMessage> = snapshot
            .documents
            .iter()
            .filter_map(|doc| match ChatMessage::from_document(doc) {
                Ok(message) => Some(message),
                Err(err) => {
                    warn!(id = %doc.id, error = %err, "dropping malformed message document");
                    None
                }
            })
            .collect();
        messages.sort_by(Self::display_order);

        self.messages = messages;
        self.loaded = true;
    }

    /// Timestamp ascending, unresolved timestamps last, ties broken by id
    /// so the order never flaps between snapshots.
    fn display_order(a: &ChatMessage, b: &ChatMessage) -> Ordering {
        match (a.sent_at, b.sent_at) {
            (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.id.cmp(&b.id)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.id.cmp(&b.id),
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Whether the first snapshot has arrived.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The `nth` most recent message sent by `user_id` (0 = latest).
    pub fn own_recent(&self, user_id: &str, nth: usize) -> Option<&ChatMessage> {
        self.messages
            .iter()
            .rev()
            .filter(|message| message.is_own(user_id))
            .nth(nth)
    }
}
