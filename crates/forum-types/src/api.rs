use serde::{Deserialize, Serialize};

use crate::models::{Access, EventId, MessageId, Reaction, Role, UserId};

// -- JWT Claims --

/// JWT claims shared across forum-api (REST middleware) and forum-gateway
/// (WebSocket authentication). Tokens are minted by the identity service;
/// the forum only validates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub name: String,
    pub role: Role,
    pub exp: usize,
}

// -- Messages --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateMessageRequest {
    pub event_id: EventId,
    pub content: String,
    #[serde(default)]
    pub parent_message_id: Option<MessageId>,
    #[serde(default)]
    pub is_announcement: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinResponse {
    pub is_pinned: bool,
}

// -- Reactions --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToggleReactionRequest {
    pub emoji: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionsResponse {
    pub reactions: Vec<Reaction>,
}

// -- Viewer --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerResponse {
    pub id: UserId,
    pub name: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessResponse {
    pub access: Access,
}
