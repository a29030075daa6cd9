//! Domain types and the live-view reconciliation logic: the message
//! timeline, the typing roster, the composer and its debounced typing
//! signal. Everything here is pure state driven by the app loop; writes go
//! out through the store.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::store::Document;

pub use composer::{Composer, EditState, SubmitIntent};
pub use presence::{active_typists, TYPING_FRESHNESS_MS};
pub use timeline::Timeline;
pub use typing::{TypingDebouncer, TYPING_QUIET_PERIOD};

mod composer;
mod presence;
mod timeline;
mod typing;

/// One chat utterance as rendered. `sent_at` is the server-assigned
/// creation timestamp and can be momentarily unresolved for a message this
/// client just wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: String,
    pub sender_nickname: Option<String>,
    pub text: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub edited_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct MessageFields {
    sender_id: String,
    #[serde(default)]
    sender_nickname: Option<String>,
    text: String,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("document id is empty")]
    MissingId,

    #[error("sender id is empty")]
    MissingSender,

    #[error("invalid message fields: {0}")]
    Fields(#[from] serde_json::Error),
}

impl ChatMessage {
    pub fn from_document(doc: &Document) -> Result<Self, ParseError> {
        if doc.id.is_empty() {
            return Err(ParseError::MissingId);
        }
        let fields: MessageFields = serde_json::from_value(doc.fields.clone())?;
        if fields.sender_id.is_empty() {
            return Err(ParseError::MissingSender);
        }

        // A document rewritten after creation has been edited.
        let edited_at = match (doc.created_at, doc.updated_at) {
            (Some(created), Some(updated)) if updated > created => Some(updated),
            _ => None,
        };

        Ok(Self {
            id: doc.id.clone(),
            sender_id: fields.sender_id,
            sender_nickname: fields.sender_nickname,
            text: fields.text,
            sent_at: doc.created_at,
            edited_at,
        })
    }

    /// Display name, falling back to the raw sender identity.
    pub fn display_name(&self) -> &str {
        self.sender_nickname
            .as_deref()
            .filter(|nick| !nick.is_empty())
            .unwrap_or(&self.sender_id)
    }

    pub fn is_own(&self, user_id: &str) -> bool {
        self.sender_id == user_id
    }
}

/// Per-user ephemeral typing status, keyed by user identity.
#[derive(Debug, Clone)]
pub struct PresenceRecord {
    pub user_id: String,
    pub nickname: Option<String>,
    pub is_typing: bool,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct PresenceFields {
    #[serde(default)]
    is_typing: bool,
    #[serde(default)]
    nickname: Option<String>,
}

impl PresenceRecord {
    /// Presence documents are advisory; anything malformed is just dropped.
    pub fn from_document(doc: &Document) -> Option<Self> {
        if doc.id.is_empty() {
            return None;
        }
        let fields: PresenceFields = serde_json::from_value(doc.fields.clone()).ok()?;
        Some(Self {
            user_id: doc.id.clone(),
            nickname: fields.nickname,
            is_typing: fields.is_typing,
            timestamp: doc.updated_at,
        })
    }

    pub fn display_name(&self) -> &str {
        self.nickname
            .as_deref()
            .filter(|nick| !nick.is_empty())
            .unwrap_or(&self.user_id)
    }
}
