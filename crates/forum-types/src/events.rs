use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{EventId, Message, MessageId, Reaction};

/// Pushes sent over the live channel, server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ForumEvent {
    /// A message was created in the room
    NewMessage(Message),

    /// A message (and its replies) was hard-deleted
    MessageDeleted {
        event_id: EventId,
        message_id: MessageId,
    },

    /// Pin state after a toggle
    MessagePinned {
        event_id: EventId,
        message_id: MessageId,
        is_pinned: bool,
    },

    /// Full reaction list after a toggle
    ReactionUpdated {
        event_id: EventId,
        message_id: MessageId,
        reactions: Vec<Reaction>,
    },

    /// Someone in the room is typing
    UserTyping { event_id: EventId, user_name: String },

    /// Typing stopped
    UserStoppedTyping { event_id: EventId },
}

impl ForumEvent {
    /// Every push is scoped to one event room.
    pub fn event_id(&self) -> &EventId {
        match self {
            Self::NewMessage(message) => &message.event_id,
            Self::MessageDeleted { event_id, .. }
            | Self::MessagePinned { event_id, .. }
            | Self::ReactionUpdated { event_id, .. }
            | Self::UserTyping { event_id, .. }
            | Self::UserStoppedTyping { event_id } => event_id,
        }
    }

    pub fn kind(&self) -> PushKind {
        match self {
            Self::NewMessage(_) => PushKind::NewMessage,
            Self::MessageDeleted { .. } => PushKind::MessageDeleted,
            Self::MessagePinned { .. } => PushKind::MessagePinned,
            Self::ReactionUpdated { .. } => PushKind::ReactionUpdated,
            Self::UserTyping { .. } => PushKind::UserTyping,
            Self::UserStoppedTyping { .. } => PushKind::UserStoppedTyping,
        }
    }
}

/// Discriminant of [`ForumEvent`], used to key push handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PushKind {
    NewMessage,
    MessageDeleted,
    MessagePinned,
    ReactionUpdated,
    UserTyping,
    UserStoppedTyping,
}

impl PushKind {
    pub const ALL: [PushKind; 6] = [
        PushKind::NewMessage,
        PushKind::MessageDeleted,
        PushKind::MessagePinned,
        PushKind::ReactionUpdated,
        PushKind::UserTyping,
        PushKind::UserStoppedTyping,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewMessage => "new-message",
            Self::MessageDeleted => "message-deleted",
            Self::MessagePinned => "message-pinned",
            Self::ReactionUpdated => "reaction-updated",
            Self::UserTyping => "user-typing",
            Self::UserStoppedTyping => "user-stopped-typing",
        }
    }
}

impl fmt::Display for PushKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commands sent FROM client TO server over the live channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientCommand {
    /// Subscribe this connection to an event room
    JoinEvent { event_id: EventId },

    /// Unsubscribe from an event room
    LeaveEvent { event_id: EventId },

    /// Relay a typing signal to the rest of the room
    Typing { event_id: EventId, user_name: String },

    /// Relay an explicit typing stop
    StopTyping { event_id: EventId },
}

impl ClientCommand {
    pub fn event_id(&self) -> &EventId {
        match self {
            Self::JoinEvent { event_id }
            | Self::LeaveEvent { event_id }
            | Self::Typing { event_id, .. }
            | Self::StopTyping { event_id } => event_id,
        }
    }
}
