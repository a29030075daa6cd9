//! Client for the hosted document-sync service.
//!
//! The backend owns persistence, authentication and fan-out; this module is
//! the thin seam the rest of the app talks through. Collections are plain
//! lists of JSON documents and every observed change is delivered as a full
//! snapshot of the collection, never a delta.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use client::HttpStore;

mod client;
#[cfg(test)]
pub mod memory;

/// Collection holding one document per chat message.
pub const MESSAGES: &str = "messages";
/// Collection holding one presence document per user identity.
pub const TYPING_STATUS: &str = "typing_status";

/// One document as the service returns it. `created_at` can be null for a
/// moment after a write while the server finalises timestamp assignment.
#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fields: Value,
}

/// Complete listing of a collection, delivered as a unit.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Snapshot {
    pub documents: Vec<Document>,
}

/// What a subscription yields. `Lost` is non-fatal: the feed keeps running
/// and the consumer is expected to keep its last materialized state.
#[derive(Debug)]
pub enum StoreEvent {
    Snapshot(Snapshot),
    Lost(StoreError),
}

/// Session identity handed out by the service on anonymous sign-in.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub token: String,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("not signed in")]
    Unauthenticated,

    #[error("permission denied")]
    PermissionDenied,

    #[error("document not found")]
    NotFound,

    #[error("service returned {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Owner of one live subscription. Dropping the handle cancels the feed so
/// no snapshot is ever delivered into a torn-down consumer.
#[derive(Debug)]
pub struct SubscriptionHandle {
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    /// Handle for a subscription with no backing task of its own.
    #[cfg(test)]
    pub fn detached() -> Self {
        Self { task: None }
    }

    pub fn cancel(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Remote document store with live subscriptions.
///
/// Futures are `Send` so writes can be issued from spawned tasks as well as
/// the app loop.
pub trait RemoteStore: Send + Sync + 'static {
    /// Anonymous sign-in. Yields the stable identity for this session.
    fn authenticate(&self) -> impl Future<Output = Result<Identity, StoreError>> + Send;

    /// Create a document; the server assigns id and timestamps.
    fn create(
        &self,
        collection: &str,
        fields: Value,
    ) -> impl Future<Output = Result<String, StoreError>> + Send;

    /// Partial field overwrite of an existing document.
    fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Value,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Create-or-replace under a caller-chosen id.
    fn upsert(
        &self,
        collection: &str,
        id: &str,
        fields: Value,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn delete(
        &self,
        collection: &str,
        id: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Open a live feed of full snapshots for a collection.
    fn subscribe(
        &self,
        collection: &str,
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<StoreEvent>);
}
