//! The durable message store as seen from the client.
//!
//! [`MessageStore`] is the seam the room engine calls through; tests swap in
//! scripted stores, production uses [`HttpMessageStore`] against the forum's
//! REST endpoints.

use std::future::Future;

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::warn;

use forum_types::api::{
    AccessResponse, CreateMessageRequest, PinResponse, ReactionsResponse, ToggleReactionRequest,
    ViewerResponse,
};
use forum_types::models::{Access, EventId, Message, MessageId, Reaction, UnreadSummary};

use crate::error::SyncError;
use crate::identity::{AccessProvider, IdentityProvider, Viewer};

pub trait MessageStore: Clone + Send + Sync + 'static {
    /// All messages of an event, newest first.
    fn fetch_messages(&self, event_id: &EventId) -> impl Future<Output = Result<Vec<Message>, SyncError>> + Send;

    fn fetch_unread(&self, event_id: &EventId) -> impl Future<Output = Result<UnreadSummary, SyncError>> + Send;

    /// Idempotent.
    fn mark_read(&self, event_id: &EventId) -> impl Future<Output = Result<(), SyncError>> + Send;

    fn create_message(
        &self,
        request: CreateMessageRequest,
    ) -> impl Future<Output = Result<Message, SyncError>> + Send;

    fn delete_message(&self, message_id: &MessageId) -> impl Future<Output = Result<(), SyncError>> + Send;

    /// Returns the pin state after the toggle.
    fn toggle_pin(&self, message_id: &MessageId) -> impl Future<Output = Result<bool, SyncError>> + Send;

    /// Returns the message's full reaction list after the toggle.
    fn toggle_reaction(
        &self,
        message_id: &MessageId,
        emoji: &str,
    ) -> impl Future<Output = Result<Vec<Reaction>, SyncError>> + Send;
}

/// How a 403 is reported depends on what was attempted.
#[derive(Debug, Clone, Copy)]
enum Op {
    Read,
    Write,
    Moderate,
}

#[derive(Clone)]
pub struct HttpMessageStore {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpMessageStore {
    pub fn new(base_url: &str, token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, SyncError> {
        let resp = self
            .client
            .get(self.url(path))
            .header("Authorization", self.bearer())
            .send()
            .await?;
        Ok(check(resp, Op::Read).await?.json().await?)
    }
}

/// Map a non-success response onto the error taxonomy.
async fn check(resp: Response, op: Op) -> Result<Response, SyncError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    warn!("Store call failed ({}): {}", status, body);

    Err(match (status, op) {
        (StatusCode::BAD_REQUEST, _) => SyncError::InvalidRequest(reason(status, body)),
        (StatusCode::UNAUTHORIZED, _) => SyncError::Unauthorized,
        (StatusCode::NOT_FOUND, _) => SyncError::NotFound,
        (StatusCode::FORBIDDEN, Op::Moderate) => SyncError::Unauthorized,
        (StatusCode::FORBIDDEN, Op::Read) => SyncError::NotAMember,
        (StatusCode::FORBIDDEN, Op::Write) => SyncError::WriteRejected(reason(status, body)),
        (_, Op::Read) => SyncError::TransportUnavailable,
        (_, _) => SyncError::WriteRejected(reason(status, body)),
    })
}

fn reason(status: StatusCode, body: String) -> String {
    if body.is_empty() {
        status.to_string()
    } else {
        body
    }
}

impl MessageStore for HttpMessageStore {
    async fn fetch_messages(&self, event_id: &EventId) -> Result<Vec<Message>, SyncError> {
        self.get_json(&format!("/api/messages/{}", event_id)).await
    }

    async fn fetch_unread(&self, event_id: &EventId) -> Result<UnreadSummary, SyncError> {
        self.get_json(&format!("/api/messages/{}/unread", event_id)).await
    }

    async fn mark_read(&self, event_id: &EventId) -> Result<(), SyncError> {
        let resp = self
            .client
            .post(self.url(&format!("/api/messages/{}/mark-read", event_id)))
            .header("Authorization", self.bearer())
            .send()
            .await?;
        check(resp, Op::Write).await?;
        Ok(())
    }

    async fn create_message(&self, request: CreateMessageRequest) -> Result<Message, SyncError> {
        let resp = self
            .client
            .post(self.url("/api/messages"))
            .header("Authorization", self.bearer())
            .json(&request)
            .send()
            .await?;
        Ok(check(resp, Op::Write).await?.json().await?)
    }

    async fn delete_message(&self, message_id: &MessageId) -> Result<(), SyncError> {
        let resp = self
            .client
            .delete(self.url(&format!("/api/messages/{}", message_id)))
            .header("Authorization", self.bearer())
            .send()
            .await?;
        check(resp, Op::Moderate).await?;
        Ok(())
    }

    async fn toggle_pin(&self, message_id: &MessageId) -> Result<bool, SyncError> {
        let resp = self
            .client
            .put(self.url(&format!("/api/messages/{}/pin", message_id)))
            .header("Authorization", self.bearer())
            .send()
            .await?;
        let pin: PinResponse = check(resp, Op::Moderate).await?.json().await?;
        Ok(pin.is_pinned)
    }

    async fn toggle_reaction(&self, message_id: &MessageId, emoji: &str) -> Result<Vec<Reaction>, SyncError> {
        let resp = self
            .client
            .post(self.url(&format!("/api/messages/{}/react", message_id)))
            .header("Authorization", self.bearer())
            .json(&ToggleReactionRequest { emoji: emoji.to_string() })
            .send()
            .await?;
        let body: ReactionsResponse = check(resp, Op::Write).await?.json().await?;
        Ok(body.reactions)
    }
}

impl IdentityProvider for HttpMessageStore {
    async fn current_viewer(&self) -> Result<Viewer, SyncError> {
        let me: ViewerResponse = self.get_json("/api/me").await?;
        Ok(Viewer {
            id: me.id,
            name: me.name,
            role: me.role,
        })
    }
}

impl AccessProvider for HttpMessageStore {
    async fn access(&self, event_id: &EventId) -> Result<Access, SyncError> {
        let body: AccessResponse = self.get_json(&format!("/api/events/{}/access", event_id)).await?;
        Ok(body.access)
    }
}
