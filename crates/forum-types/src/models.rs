use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum message length in characters, after trimming.
pub const MAX_CONTENT_CHARS: usize = 2000;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifier of an event; also names the event's forum room.
    EventId
);
string_id!(UserId);
string_id!(
    /// Server-assigned message identifier.
    MessageId
);

/// Account-level role of a user. Distinct from [`Message::is_event_organizer`],
/// which is scoped to one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Participant,
    Organizer,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Participant => "participant",
            Self::Organizer => "organizer",
            Self::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "participant" => Some(Self::Participant),
            "organizer" => Some(Self::Organizer),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A viewer's standing for one event. Only organizers and registered
/// attendees may read or post in the event's forum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    Organizer,
    Registered,
    None,
}

impl Access {
    pub fn can_join(self) -> bool {
        !matches!(self, Self::None)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Organizer => "organizer",
            Self::Registered => "registered",
            Self::None => "none",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "organizer" => Self::Organizer,
            "registered" => Self::Registered,
            _ => Self::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub emoji: String,
    pub user_id: UserId,
    pub user_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub event_id: EventId,
    pub content: String,
    pub author_id: UserId,
    pub author_name: String,
    pub author_role: Role,
    #[serde(default)]
    pub parent_message_id: Option<MessageId>,
    #[serde(default)]
    pub is_announcement: bool,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_event_organizer: bool,
}

impl Message {
    pub fn is_reply(&self) -> bool {
        self.parent_message_id.is_some()
    }
}

/// One line of the unread tooltip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadPreview {
    pub author_name: String,
    pub author_role: Role,
    pub content: String,
}

/// Durable unread state of one viewer for one event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadSummary {
    pub unread_count: u32,
    #[serde(default)]
    pub unread_messages: Vec<UnreadPreview>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_wire_shape_is_camel_case() {
        let json = serde_json::json!({
            "id": "msg_abc123",
            "eventId": "evt1",
            "content": "hello",
            "authorId": "u1",
            "authorName": "Alice",
            "authorRole": "organizer",
            "parentMessageId": null,
            "isAnnouncement": true,
            "isPinned": false,
            "reactions": [{"emoji": "👍", "userId": "u2", "userName": "Bob"}],
            "createdAt": "2024-01-01T10:00:00Z",
            "isEventOrganizer": true
        });

        let msg: Message = serde_json::from_value(json).unwrap();
        assert_eq!(msg.id.as_str(), "msg_abc123");
        assert_eq!(msg.author_role, Role::Organizer);
        assert_eq!(msg.reactions[0].user_name, "Bob");
        assert!(!msg.is_reply());

        let back = serde_json::to_value(&msg).unwrap();
        assert_eq!(back["isEventOrganizer"], true);
        assert_eq!(back["authorRole"], "organizer");
    }

    #[test]
    fn access_parsing_defaults_to_none() {
        assert_eq!(Access::parse("organizer"), Access::Organizer);
        assert_eq!(Access::parse("registered"), Access::Registered);
        assert_eq!(Access::parse("banned"), Access::None);
        assert!(!Access::None.can_join());
    }
}
