//! `RemoteDataService` over the backend's REST interface.
//!
//! Tables are addressed PostgREST-style: `GET /rest/v1/notes?user_id=eq.<owner>`,
//! upserts are `POST`s that merge on the primary key, deletes filter on both id
//! and owner. Change feeds are delegated to a `RealtimeClient`.

use crate::realtime::RealtimeClient;
use async_trait::async_trait;
use notes_sync_core::remote::{ChangeFeed, RemoteDataService, RemoteError, Result};
use notes_sync_core::{EntityKind, Note, OwnerId, TodoList};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

pub struct HttpRemote {
    client: Client,
    api_url: String,
    api_key: String,
    access_token: Option<String>,
    realtime: Option<RealtimeClient>,
}

impl HttpRemote {
    pub fn new(api_url: &str, api_key: &str) -> Result<Self> {
        Self::with_timeout(api_url, api_key, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(api_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            access_token: None,
            realtime: None,
        })
    }

    /// Authenticate requests as a signed-in user rather than with the API key.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Enable `subscribe` through the given realtime endpoint.
    pub fn with_realtime(mut self, realtime: RealtimeClient) -> Self {
        self.realtime = Some(realtime);
        self
    }

    pub fn table_url(&self, kind: EntityKind) -> String {
        format!("{}/rest/v1/{}", self.api_url, kind.table())
    }

    fn request(&self, method: Method, kind: EntityKind) -> RequestBuilder {
        let token = self.access_token.as_deref().unwrap_or(&self.api_key);
        self.client
            .request(method, self.table_url(kind))
            .header("apikey", &self.api_key)
            .bearer_auth(token)
    }

    async fn list<T: DeserializeOwned>(&self, kind: EntityKind, owner: &OwnerId) -> Result<Vec<T>> {
        let response = self
            .request(Method::GET, kind)
            .query(&[
                ("select", "*".to_string()),
                ("user_id", format!("eq.{}", owner)),
                ("order", "order.asc".to_string()),
            ])
            .send()
            .await
            .map_err(request_error)?;

        let records: Vec<T> = check(response)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;

        debug!("Fetched {} {} for {}", records.len(), kind.table(), owner);
        Ok(records)
    }

    async fn upsert<T: Serialize + Sync>(&self, kind: EntityKind, record: &T) -> Result<()> {
        let response = self
            .request(Method::POST, kind)
            .query(&[("on_conflict", "id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[record])
            .send()
            .await
            .map_err(request_error)?;
        check(response).await?;
        Ok(())
    }

    async fn delete(&self, kind: EntityKind, owner: &OwnerId, id: &str) -> Result<()> {
        let response = self
            .request(Method::DELETE, kind)
            .query(&[
                ("id", format!("eq.{}", id)),
                ("user_id", format!("eq.{}", owner)),
            ])
            .send()
            .await
            .map_err(request_error)?;
        check(response).await?;
        Ok(())
    }
}

fn request_error(e: reqwest::Error) -> RemoteError {
    if e.is_decode() {
        RemoteError::Decode(e.to_string())
    } else {
        RemoteError::Network(e.to_string())
    }
}

/// Map non-success responses to errors, keeping the body as the message.
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(status_error(status, message))
}

fn status_error(status: StatusCode, message: String) -> RemoteError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized(message),
        _ => RemoteError::Server {
            status: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl RemoteDataService for HttpRemote {
    async fn list_notes(&self, owner: &OwnerId) -> Result<Vec<Note>> {
        self.list(EntityKind::Note, owner).await
    }

    async fn list_todo_lists(&self, owner: &OwnerId) -> Result<Vec<TodoList>> {
        self.list(EntityKind::TodoList, owner).await
    }

    async fn upsert_note(&self, note: &Note) -> Result<()> {
        self.upsert(EntityKind::Note, note).await
    }

    async fn delete_note(&self, owner: &OwnerId, id: &str) -> Result<()> {
        self.delete(EntityKind::Note, owner, id).await
    }

    async fn upsert_todo_list(&self, list: &TodoList) -> Result<()> {
        self.upsert(EntityKind::TodoList, list).await
    }

    async fn delete_todo_list(&self, owner: &OwnerId, id: &str) -> Result<()> {
        self.delete(EntityKind::TodoList, owner, id).await
    }

    async fn subscribe(&self, owner: &OwnerId, kind: EntityKind) -> Result<ChangeFeed> {
        match &self.realtime {
            Some(realtime) => realtime.open(owner, kind).await,
            None => Err(RemoteError::Subscription("realtime is disabled".to_string())),
        }
    }
}
