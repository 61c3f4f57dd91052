use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use forum_db::models::{MessageRow, NewMessageRow, ReactionRow};
use forum_types::api::{Claims, CreateMessageRequest, PinResponse};
use forum_types::events::ForumEvent;
use forum_types::models::{Access, MAX_CONTENT_CHARS, Message, Reaction, Role};

use crate::state::{AppState, require_access, require_moderator, run_db};

pub async fn get_messages(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    require_access(&state, &claims, &event_id).await?;

    let (rows, reaction_rows) = run_db(&state, move |db| {
        let rows = db.get_messages(&event_id)?;
        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let reactions = db.get_reactions_for_messages(&ids)?;
        Ok((rows, reactions))
    })
    .await?;

    let mut reactions = group_reactions(reaction_rows);
    let messages: Vec<Message> = rows
        .into_iter()
        .map(|row| {
            let r = reactions.remove(&row.id).unwrap_or_default();
            to_message(row, r)
        })
        .collect();

    Ok(Json(messages))
}

pub async fn create_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let length = req.content.trim().chars().count();
    if length == 0 || length > MAX_CONTENT_CHARS {
        return Err(StatusCode::BAD_REQUEST);
    }

    let access = require_access(&state, &claims, req.event_id.as_str()).await?;
    let is_organizer = access == Access::Organizer;
    if req.is_announcement && !is_organizer {
        warn!("{} ({}) tried to announce in {}", claims.name, claims.sub, req.event_id);
        return Err(StatusCode::FORBIDDEN);
    }

    // Replies hang off a top-level message of the same event; no deeper threads
    if let Some(parent_id) = &req.parent_message_id {
        let pid = parent_id.to_string();
        let parent = run_db(&state, move |db| db.get_message(&pid)).await?;
        match parent {
            Some(parent) if parent.event_id == req.event_id.as_str() && parent.parent_id.is_none() => {}
            _ => return Err(StatusCode::BAD_REQUEST),
        }
    }

    let message_id = Uuid::new_v4().to_string();
    let created_at = Utc::now().to_rfc3339();
    let author_id = claims.sub.to_string();
    let author_name = claims.name.clone();
    let author_role = claims.role.as_str();
    let event_id = req.event_id.to_string();
    let parent_id = req.parent_message_id.as_ref().map(|p| p.to_string());
    let is_announcement = req.is_announcement;
    let content = req.content;

    let row = run_db(&state, move |db| {
        db.insert_message(&NewMessageRow {
            id: &message_id,
            event_id: &event_id,
            content: &content,
            author_id: &author_id,
            author_name: &author_name,
            author_role,
            parent_id: parent_id.as_deref(),
            is_announcement,
            is_event_organizer: is_organizer,
            created_at: &created_at,
        })
    })
    .await?;

    let message = to_message(row, vec![]);

    // Broadcast to the event room, author included
    state.dispatcher.publish(&ForumEvent::NewMessage(message.clone()));

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let row = find_message(&state, &message_id).await?;
    require_moderator(&state, &claims, &row.event_id).await?;

    let mid = message_id.clone();
    if !run_db(&state, move |db| db.delete_message(&mid)).await? {
        return Err(StatusCode::NOT_FOUND);
    }

    info!("{} deleted message {} in {}", claims.name, message_id, row.event_id);
    state.dispatcher.publish(&ForumEvent::MessageDeleted {
        event_id: row.event_id.into(),
        message_id: message_id.into(),
    });

    Ok(StatusCode::NO_CONTENT)
}

pub async fn toggle_pin(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let row = find_message(&state, &message_id).await?;
    require_moderator(&state, &claims, &row.event_id).await?;

    let mid = message_id.clone();
    let is_pinned = run_db(&state, move |db| db.toggle_pin(&mid))
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;

    state.dispatcher.publish(&ForumEvent::MessagePinned {
        event_id: row.event_id.into(),
        message_id: message_id.into(),
        is_pinned,
    });

    Ok(Json(PinResponse { is_pinned }))
}

pub(crate) async fn find_message(state: &AppState, message_id: &str) -> Result<MessageRow, StatusCode> {
    let mid = message_id.to_string();
    run_db(state, move |db| db.get_message(&mid))
        .await?
        .ok_or(StatusCode::NOT_FOUND)
}

/// Group reaction rows by message, keeping insertion order within each message.
pub(crate) fn group_reactions(rows: Vec<ReactionRow>) -> HashMap<String, Vec<Reaction>> {
    let mut map: HashMap<String, Vec<Reaction>> = HashMap::new();
    for r in rows {
        map.entry(r.message_id).or_default().push(Reaction {
            emoji: r.emoji,
            user_id: r.user_id.into(),
            user_name: r.user_name,
        });
    }
    map
}

pub(crate) fn parse_role(raw: &str, context: &str) -> Role {
    Role::parse(raw).unwrap_or_else(|| {
        warn!("Unknown role '{}' on {}", raw, context);
        Role::Participant
    })
}

pub(crate) fn to_message(row: MessageRow, reactions: Vec<Reaction>) -> Message {
    let author_role = parse_role(&row.author_role, &row.id);
    let created_at = parse_timestamp(&row.created_at).unwrap_or_else(|| {
        warn!("Corrupt created_at '{}' on message '{}'", row.created_at, row.id);
        DateTime::<Utc>::default()
    });

    Message {
        id: row.id.into(),
        event_id: row.event_id.into(),
        content: row.content,
        author_id: row.author_id.into(),
        author_name: row.author_name,
        author_role,
        parent_message_id: row.parent_id.map(Into::into),
        is_announcement: row.is_announcement,
        is_pinned: row.is_pinned,
        reactions,
        created_at,
        is_event_organizer: row.is_event_organizer,
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') has no timezone; treat it as UTC
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, role: &str, created_at: &str) -> MessageRow {
        MessageRow {
            seq: 1,
            id: id.into(),
            event_id: "evt1".into(),
            content: "hello".into(),
            author_id: "u1".into(),
            author_name: "Alice".into(),
            author_role: role.into(),
            parent_id: None,
            is_announcement: false,
            is_pinned: true,
            is_event_organizer: true,
            created_at: created_at.into(),
        }
    }

    #[test]
    fn row_converts_to_wire_message() {
        let msg = to_message(row("m1", "organizer", "2024-01-01T10:00:00+00:00"), vec![]);
        assert_eq!(msg.id.as_str(), "m1");
        assert_eq!(msg.author_role, Role::Organizer);
        assert!(msg.is_pinned);
        assert_eq!(msg.created_at.to_rfc3339(), "2024-01-01T10:00:00+00:00");
    }

    #[test]
    fn sqlite_timestamps_and_unknown_roles_degrade() {
        let msg = to_message(row("m1", "wizard", "2024-01-01 10:00:00"), vec![]);
        assert_eq!(msg.author_role, Role::Participant);
        assert_eq!(msg.created_at.to_rfc3339(), "2024-01-01T10:00:00+00:00");
    }

    #[test]
    fn reactions_group_by_message_in_order() {
        let rows = vec![
            ReactionRow { message_id: "m1".into(), user_id: "u1".into(), user_name: "A".into(), emoji: "👍".into() },
            ReactionRow { message_id: "m2".into(), user_id: "u1".into(), user_name: "A".into(), emoji: "🎉".into() },
            ReactionRow { message_id: "m1".into(), user_id: "u2".into(), user_name: "B".into(), emoji: "👍".into() },
        ];
        let grouped = group_reactions(rows);
        let m1: Vec<&str> = grouped["m1"].iter().map(|r| r.user_id.as_str()).collect();
        assert_eq!(m1, vec!["u1", "u2"]);
        assert_eq!(grouped["m2"].len(), 1);
    }
}
