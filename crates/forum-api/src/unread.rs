use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use forum_types::api::Claims;
use forum_types::models::{UnreadPreview, UnreadSummary};

use crate::messages::parse_role;
use crate::state::{AppState, require_access, run_db};

/// How many of the newest unread messages are returned as previews.
const PREVIEW_LIMIT: u32 = 10;

pub async fn get_unread(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    require_access(&state, &claims, &event_id).await?;

    let uid = claims.sub.to_string();
    let (unread_count, rows) =
        run_db(&state, move |db| db.get_unread(&event_id, &uid, PREVIEW_LIMIT)).await?;

    let unread_messages = rows
        .into_iter()
        .map(|row| UnreadPreview {
            author_role: parse_role(&row.author_role, &row.id),
            author_name: row.author_name,
            content: row.content,
        })
        .collect();

    Ok(Json(UnreadSummary {
        unread_count,
        unread_messages,
    }))
}

/// Idempotent: marking an already-read event is a no-op.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    require_access(&state, &claims, &event_id).await?;

    let uid = claims.sub.to_string();
    run_db(&state, move |db| db.mark_read(&event_id, &uid)).await?;

    Ok(StatusCode::NO_CONTENT)
}
