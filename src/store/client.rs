use std::sync::OnceLock;
use std::time::Duration;

use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{Identity, RemoteStore, Snapshot, StoreError, StoreEvent, SubscriptionHandle};
use crate::config::Config;

/// How often a subscription polls its collection for changes.
const POLL_INTERVAL: Duration = Duration::from_millis(1000);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for the hosted sync service.
///
/// Subscriptions are realised by a background task that polls the
/// collection listing and forwards full snapshots over a channel whenever
/// the listing changes, so consumers see the same snapshot stream they
/// would get from a push transport.
pub struct HttpStore {
    http: reqwest::Client,
    server_url: String,
    app_id: String,
    api_key: String,
    auth: OnceLock<Identity>,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    user_id: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

impl HttpStore {
    pub fn new(config: &Config) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            server_url: config.server_url.trim_end_matches('/').to_string(),
            app_id: config.app_id.clone(),
            api_key: config.api_key.clone(),
            auth: OnceLock::new(),
        })
    }

    fn collection_url(&self, collection: &str) -> String {
        format!(
            "{}/v1/apps/{}/collections/{}/documents",
            self.server_url, self.app_id, collection
        )
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{}", self.collection_url(collection), id)
    }

    fn token(&self) -> Result<&str, StoreError> {
        self.auth
            .get()
            .map(|identity| identity.token.as_str())
            .ok_or(StoreError::Unauthenticated)
    }

    /// Map a non-success response onto the error taxonomy, pulling the
    /// service's `{"error": ...}` body through when present.
    async fn check(response: Response) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        Err(match status {
            StatusCode::UNAUTHORIZED => StoreError::Unauthenticated,
            StatusCode::FORBIDDEN => StoreError::PermissionDenied,
            StatusCode::NOT_FOUND => StoreError::NotFound,
            _ => {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ErrorBody>(&body)
                    .map(|b| b.error)
                    .unwrap_or(body);
                StoreError::Backend {
                    status: status.as_u16(),
                    message,
                }
            }
        })
    }

    async fn fetch_snapshot(
        http: &reqwest::Client,
        url: &str,
        api_key: &str,
        token: &str,
    ) -> Result<(String, Snapshot), StoreError> {
        let response = http
            .get(url)
            .header("x-api-key", api_key)
            .bearer_auth(token)
            .send()
            .await?;
        let body = Self::check(response).await?.text().await?;
        let snapshot: Snapshot = serde_json::from_str(&body)?;
        Ok((body, snapshot))
    }
}

impl RemoteStore for HttpStore {
    async fn authenticate(&self) -> Result<Identity, StoreError> {
        let response = self
            .http
            .post(format!("{}/v1/auth/anonymous", self.server_url))
            .header("x-api-key", &self.api_key)
            .json(&json!({}))
            .send()
            .await?;
        let auth: AuthResponse = Self::check(response).await?.json().await?;

        let identity = Identity {
            user_id: auth.user_id,
            token: auth.token,
        };
        let _ = self.auth.set(identity.clone());
        info!(user_id = %identity.user_id, "signed in anonymously");
        Ok(identity)
    }

    async fn create(&self, collection: &str, fields: Value) -> Result<String, StoreError> {
        let response = self
            .http
            .post(self.collection_url(collection))
            .header("x-api-key", &self.api_key)
            .bearer_auth(self.token()?)
            .json(&json!({ "fields": fields }))
            .send()
            .await?;
        let created: CreateResponse = Self::check(response).await?.json().await?;
        Ok(created.id)
    }

    async fn update(&self, collection: &str, id: &str, fields: Value) -> Result<(), StoreError> {
        let response = self
            .http
            .patch(self.document_url(collection, id))
            .header("x-api-key", &self.api_key)
            .bearer_auth(self.token()?)
            .json(&json!({ "fields": fields }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn upsert(&self, collection: &str, id: &str, fields: Value) -> Result<(), StoreError> {
        let response = self
            .http
            .put(self.document_url(collection, id))
            .header("x-api-key", &self.api_key)
            .bearer_auth(self.token()?)
            .json(&json!({ "fields": fields }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let response = self
            .http
            .delete(self.document_url(collection, id))
            .header("x-api-key", &self.api_key)
            .bearer_auth(self.token()?)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    fn subscribe(
        &self,
        collection: &str,
    ) -> (SubscriptionHandle, mpsc::UnboundedReceiver<StoreEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();

        let http = self.http.clone();
        let url = self.collection_url(collection);
        let api_key = self.api_key.clone();
        let token = self.auth.get().map(|identity| identity.token.clone());
        let name = collection.to_string();

        let task = tokio::spawn(async move {
            let Some(token) = token else {
                let _ = tx.send(StoreEvent::Lost(StoreError::Unauthenticated));
                return;
            };

            let mut last_body: Option<String> = None;
            let mut ticker = tokio::time::interval(POLL_INTERVAL);

            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }

                match Self::fetch_snapshot(&http, &url, &api_key, &token).await {
                    Ok((body, snapshot)) => {
                        if last_body.as_deref() == Some(body.as_str()) {
                            continue;
                        }
                        debug!(collection = %name, documents = snapshot.documents.len(), "snapshot changed");
                        last_body = Some(body);
                        if tx.send(StoreEvent::Snapshot(snapshot)).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(collection = %name, error = %err, "subscription poll failed");
                        if tx.send(StoreEvent::Lost(err)).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        (SubscriptionHandle::new(task), rx)
    }
}
