//! In-process implementation of [`RemoteStore`] for tests. Mirrors the
//! service semantics the HTTP client relies on: server-assigned ids and
//! timestamps, ownership checks on mutation, and a full snapshot pushed to
//! every subscriber after each change.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio::sync::mpsc;

use super::{Document, Identity, RemoteStore, Snapshot, StoreError, StoreEvent, SubscriptionHandle};

pub struct MemoryStore {
    identity: Identity,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, Vec<Document>>,
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<StoreEvent>>>,
    next_id: u64,
    fail_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_identity("user-local")
    }

    pub fn with_identity(user_id: &str) -> Self {
        Self {
            identity: Identity {
                user_id: user_id.to_string(),
                token: "test-token".to_string(),
            },
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Make every subsequent write fail with a backend error.
    pub fn fail_writes(&self, fail: bool) {
        self.inner.lock().unwrap().fail_writes = fail;
    }

    /// Insert a document as if another client had written it.
    pub fn seed(&self, collection: &str, id: &str, fields: Value, at: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(Document {
                id: id.to_string(),
                created_at: Some(at),
                updated_at: Some(at),
                fields,
            });
        Self::notify(&mut inner, collection);
    }

    /// Push a subscription error to every subscriber of a collection.
    pub fn emit_error(&self, collection: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(subs) = inner.subscribers.get_mut(collection) {
            subs.retain(|tx| {
                tx.send(StoreEvent::Lost(StoreError::Backend {
                    status: 503,
                    message: "simulated outage".to_string(),
                }))
                .is_ok()
            });
        }
    }

    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.inner
            .lock()
            .unwrap()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    fn notify(inner: &mut Inner, collection: &str) {
        let snapshot = Snapshot {
            documents: inner
                .collections
                .get(collection)
                .cloned()
                .unwrap_or_default(),
        };
        if let Some(subs) = inner.subscribers.get_mut(collection) {
            subs.retain(|tx| tx.send(StoreEvent::Snapshot(snapshot.clone())).is_ok());
        }
    }

    fn check_writable(inner: &Inner) -> Result<(), StoreError> {
        if inner.fail_writes {
            return Err(StoreError::Backend {
                status: 500,
                message: "writes disabled".to_string(),
            });
        }
        Ok(())
    }

    fn owner_of(doc: &Document) -> Option<&str> {
        doc.fields.get("sender_id").and_then(Value::as_str)
    }
}

impl RemoteStore for MemoryStore {
    async fn authenticate(&self) -> Result<Identity, StoreError> {
        Ok(self.identity.clone())
    }

    async fn create(&self, collection: &str, fields: Value) -> Result<String, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_writable(&inner)?;

        inner.next_id += 1;
        let id = format!("doc-{}", inner.next_id);
        let now = Utc::now();
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(Document {
                id: id.clone(),
                created_at: Some(now),
                updated_at: Some(now),
                fields,
            });
        Self::notify(&mut inner, collection);
        Ok(id)
    }

    async fn update(&self, collection: &str, id: &str, fields: Value) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_writable(&inner)?;

        let user_id = self.identity.user_id.clone();
        let docs = inner
            .collections
            .get_mut(collection)
            .ok_or(StoreError::NotFound)?;
        let doc = docs
            .iter_mut()
            .find(|doc| doc.id == id)
            .ok_or(StoreError::NotFound)?;
        if Self::owner_of(doc).is_some_and(|owner| owner != user_id) {
            return Err(StoreError::PermissionDenied);
        }

        // Partial overwrite: merge object fields, replace anything else.
        if doc.fields.is_object() && fields.is_object() {
            let new = fields.as_object().cloned().unwrap_or_default();
            if let Some(existing) = doc.fields.as_object_mut() {
                for (key, value) in new {
                    existing.insert(key, value);
                }
            }
        } else {
            doc.fields = fields;
        }

        // The wall clock may not tick between a create and an update issued
        // back to back in a test; keep updated_at strictly later.
        let floor = doc
            .created_at
            .map(|created| created + Duration::milliseconds(1));
        doc.updated_at = Some(Utc::now().max(floor.unwrap_or_else(Utc::now)));
        Self::notify(&mut inner, collection);
        Ok(())
    }

    async fn upsert(&self, collection: &str, id: &str, fields: Value) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_writable(&inner)?;

        let now = Utc::now();
        let docs = inner.collections.entry(collection.to_string()).or_default();
        if let Some(index) = docs.iter().position(|doc| doc.id == id) {
            let doc = &mut docs[index];
            doc.fields = fields;
            doc.updated_at = Some(now);
        } else {
            docs.push(Document {
                id: id.to_string(),
                created_at: Some(now),
                updated_at: Some(now),
                fields,
            });
        }
        Self::notify(&mut inner, collection);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        Self::check_writable(&inner)?;

        let user_id = self.identity.user_id.clone();
        let docs = inner
            .collections
            .get_mut(collection)
            .ok_or(StoreError::NotFound)?;
        let index = docs
            .iter()
            .position(|doc| doc.id == id)
            .ok_or(StoreError::NotFound)?;
        if Self::owner_of(&docs[index]).is_some_and(|owner| owner != user_id) {
            return Err(StoreError::PermissionDenied);
        }

        docs.remove(index);
        Self::notify(&mut inner, collection);
        Ok(())
    }

    fn subscribe(
        &self,
        collection: &str,
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<StoreEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap();

        let snapshot = Snapshot {
            documents: inner
                .collections
                .get(collection)
                .cloned()
                .unwrap_or_default(),
        };
        let _ = tx.send(StoreEvent::Snapshot(snapshot));
        inner
            .subscribers
            .entry(collection.to_string())
            .or_default()
            .push(tx);

        (SubscriptionHandle::detached(), rx)
    }
}
