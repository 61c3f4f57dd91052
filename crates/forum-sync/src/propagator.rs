//! Pin, delete and react: optimistic local application, settlement against
//! the store's answer, and idempotent application of the matching pushes.

use tracing::{debug, warn};

use forum_types::events::ForumEvent;
use forum_types::models::{MessageId, Reaction};

use crate::error::SyncError;
use crate::identity::{Viewer, ViewerRole};
use crate::reconciler::{MessageCache, Removed, is_temp_id};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Moderation {
    TogglePin(MessageId),
    Delete(MessageId),
    React { message_id: MessageId, emoji: String },
}

impl Moderation {
    pub fn message_id(&self) -> &MessageId {
        match self {
            Self::TogglePin(id) | Self::Delete(id) => id,
            Self::React { message_id, .. } => message_id,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::TogglePin(_) => "pin",
            Self::Delete(_) => "delete",
            Self::React { .. } => "react",
        }
    }
}

/// What an optimistic change replaced, so a failed call can put it back.
#[derive(Debug, Clone, PartialEq)]
pub enum Undo {
    Pin { message_id: MessageId, was_pinned: bool },
    Reactions { message_id: MessageId, previous: Vec<Reaction> },
    Delete(Removed),
}

/// The store's answer to a moderation call.
#[derive(Debug, Clone, PartialEq)]
pub enum Settled {
    Pinned(bool),
    Reactions(Vec<Reaction>),
    Deleted,
}

/// Apply `action` to the cache ahead of the store call.
///
/// Participants get `Unauthorized` for pin and delete, and the cache is
/// left untouched.
pub fn apply_local(
    cache: &mut MessageCache,
    action: &Moderation,
    viewer: &Viewer,
    role: ViewerRole,
) -> Result<Undo, SyncError> {
    let id = action.message_id();
    if matches!(action, Moderation::TogglePin(_) | Moderation::Delete(_)) && !role.can_moderate() {
        return Err(SyncError::Unauthorized);
    }
    if is_temp_id(id) {
        return Err(SyncError::InvalidRequest("message has not been sent yet".into()));
    }
    if cache.get(id).is_none() {
        return Err(SyncError::NotFound);
    }

    let undo = match action {
        Moderation::TogglePin(id) => Undo::Pin {
            message_id: id.clone(),
            was_pinned: cache.toggle_pin_local(id).ok_or(SyncError::NotFound)?,
        },
        Moderation::Delete(id) => Undo::Delete(cache.apply_delete(id)),
        Moderation::React { message_id, emoji } => {
            let emoji = emoji.trim();
            if emoji.is_empty() {
                return Err(SyncError::InvalidRequest("emoji is empty".into()));
            }
            Undo::Reactions {
                message_id: message_id.clone(),
                previous: cache
                    .toggle_reaction_local(message_id, emoji, &viewer.id, &viewer.name)
                    .ok_or(SyncError::NotFound)?,
            }
        }
    };
    Ok(undo)
}

pub fn revert(cache: &mut MessageCache, undo: Undo) {
    match undo {
        Undo::Pin {
            message_id,
            was_pinned,
        } => {
            cache.apply_pin(&message_id, was_pinned);
        }
        Undo::Reactions { message_id, previous } => {
            cache.apply_reactions(&message_id, previous);
        }
        Undo::Delete(removed) => cache.restore(removed),
    }
}

/// Fold the store's answer into the cache.
///
/// Success writes the authoritative value. `NotFound` means someone else
/// already removed the message, so it is dropped locally. Any other error
/// reverts and is handed back for the caller to surface once.
pub fn settle(
    cache: &mut MessageCache,
    undo: Undo,
    result: Result<Settled, SyncError>,
) -> Result<(), SyncError> {
    match result {
        Ok(Settled::Pinned(is_pinned)) => {
            if let Undo::Pin { message_id, .. } = &undo {
                cache.apply_pin(message_id, is_pinned);
            }
            Ok(())
        }
        Ok(Settled::Reactions(reactions)) => {
            if let Undo::Reactions { message_id, .. } = &undo {
                cache.apply_reactions(message_id, reactions);
            }
            Ok(())
        }
        Ok(Settled::Deleted) => Ok(()),
        Err(SyncError::NotFound) => {
            let id = match &undo {
                Undo::Pin { message_id, .. } | Undo::Reactions { message_id, .. } => message_id.clone(),
                Undo::Delete(_) => return Ok(()),
            };
            debug!("Message {} is already gone, dropping it", id);
            cache.apply_delete(&id);
            Ok(())
        }
        Err(e) => {
            warn!("Moderation call failed, reverting: {}", e);
            revert(cache, undo);
            Err(e)
        }
    }
}

/// Apply a moderation push. Pushes carry absolute values, so an echo of
/// our own change is a no-op. Returns whether the cache changed.
pub fn apply_push(cache: &mut MessageCache, event: &ForumEvent) -> bool {
    match event {
        ForumEvent::MessageDeleted { message_id, .. } => !cache.apply_delete(message_id).is_empty(),
        ForumEvent::MessagePinned {
            message_id,
            is_pinned,
            ..
        } => cache
            .apply_pin(message_id, *is_pinned)
            .is_some_and(|was| was != *is_pinned),
        ForumEvent::ReactionUpdated {
            message_id, reactions, ..
        } => cache
            .apply_reactions(message_id, reactions.clone())
            .is_some_and(|was| &was != reactions),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use forum_types::models::Role;

    use super::*;
    use crate::reconciler::tests::message;

    fn viewer(id: &str, role: Role) -> Viewer {
        Viewer {
            id: id.into(),
            name: id.to_uppercase(),
            role,
        }
    }

    fn cache_with(ids: &[&str]) -> MessageCache {
        let mut cache = MessageCache::new();
        for id in ids.iter().rev() {
            cache.merge_push(message(id, "u9", id));
        }
        cache
    }

    fn pinned(cache: &MessageCache, id: &str) -> bool {
        cache.get(&id.into()).unwrap().message().is_pinned
    }

    #[test]
    fn participants_cannot_pin_or_delete() {
        let mut cache = cache_with(&["m1"]);
        let v = viewer("u1", Role::Participant);

        let pin = apply_local(&mut cache, &Moderation::TogglePin("m1".into()), &v, ViewerRole::Participant);
        assert_eq!(pin, Err(SyncError::Unauthorized));
        let del = apply_local(&mut cache, &Moderation::Delete("m1".into()), &v, ViewerRole::Participant);
        assert_eq!(del, Err(SyncError::Unauthorized));
        assert!(!pinned(&cache, "m1"));
        assert_eq!(cache.len(), 1);

        let react = Moderation::React {
            message_id: "m1".into(),
            emoji: "👍".into(),
        };
        assert!(apply_local(&mut cache, &react, &v, ViewerRole::Participant).is_ok());
    }

    #[test]
    fn own_pin_echo_is_not_a_double_toggle() {
        let mut cache = cache_with(&["m1"]);
        let v = viewer("u1", Role::Organizer);

        let undo = apply_local(&mut cache, &Moderation::TogglePin("m1".into()), &v, ViewerRole::Organizer).unwrap();
        assert!(pinned(&cache, "m1"));

        let echo = ForumEvent::MessagePinned {
            event_id: "evt1".into(),
            message_id: "m1".into(),
            is_pinned: true,
        };
        assert!(!apply_push(&mut cache, &echo));
        assert!(settle(&mut cache, undo, Ok(Settled::Pinned(true))).is_ok());
        assert!(pinned(&cache, "m1"));
    }

    #[test]
    fn other_viewers_converge_on_pin_push() {
        let mut cache = cache_with(&["m1"]);
        let push = ForumEvent::MessagePinned {
            event_id: "evt1".into(),
            message_id: "m1".into(),
            is_pinned: true,
        };
        assert!(apply_push(&mut cache, &push));
        assert!(!apply_push(&mut cache, &push));
        assert!(pinned(&cache, "m1"));
    }

    #[test]
    fn failed_pin_reverts_and_reports() {
        let mut cache = cache_with(&["m1"]);
        let v = viewer("u1", Role::Admin);

        let undo = apply_local(&mut cache, &Moderation::TogglePin("m1".into()), &v, ViewerRole::Admin).unwrap();
        let err = settle(&mut cache, undo, Err(SyncError::Unauthorized));
        assert_eq!(err, Err(SyncError::Unauthorized));
        assert!(!pinned(&cache, "m1"));
    }

    #[test]
    fn failed_delete_restores_entry_in_place() {
        let mut cache = cache_with(&["m1", "m2", "m3"]);
        let v = viewer("u1", Role::Organizer);

        let undo = apply_local(&mut cache, &Moderation::Delete("m2".into()), &v, ViewerRole::Organizer).unwrap();
        assert_eq!(cache.len(), 2);

        let err = settle(&mut cache, undo, Err(SyncError::WriteRejected("500".into())));
        assert!(err.is_err());
        let ids: Vec<_> = cache.messages().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m1", "m2", "m3"]);
    }

    #[test]
    fn not_found_counts_as_applied() {
        let mut cache = cache_with(&["m1"]);
        let v = viewer("u1", Role::Participant);
        let react = Moderation::React {
            message_id: "m1".into(),
            emoji: "👍".into(),
        };

        let undo = apply_local(&mut cache, &react, &v, ViewerRole::Participant).unwrap();
        assert_eq!(settle(&mut cache, undo, Err(SyncError::NotFound)), Ok(()));
        assert!(cache.is_empty());
    }

    #[test]
    fn reaction_settles_to_server_list() {
        let mut cache = cache_with(&["m1"]);
        let v = viewer("u1", Role::Participant);
        let react = Moderation::React {
            message_id: "m1".into(),
            emoji: "👍".into(),
        };

        let undo = apply_local(&mut cache, &react, &v, ViewerRole::Participant).unwrap();
        let server = vec![
            Reaction {
                emoji: "👍".into(),
                user_id: "u2".into(),
                user_name: "B".into(),
            },
            Reaction {
                emoji: "👍".into(),
                user_id: "u1".into(),
                user_name: "U1".into(),
            },
        ];
        settle(&mut cache, undo, Ok(Settled::Reactions(server.clone()))).unwrap();
        assert_eq!(cache.get(&"m1".into()).unwrap().message().reactions, server);
    }

    #[test]
    fn pending_messages_cannot_be_moderated() {
        let mut cache = MessageCache::new();
        let temp = cache.insert_pending(message("", "u1", "hi"), 1);
        let v = viewer("u1", Role::Organizer);

        let result = apply_local(&mut cache, &Moderation::TogglePin(temp), &v, ViewerRole::Organizer);
        assert!(matches!(result, Err(SyncError::InvalidRequest(_))));
    }
}
