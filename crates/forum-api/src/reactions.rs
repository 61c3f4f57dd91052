use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use forum_types::api::{Claims, ReactionsResponse, ToggleReactionRequest};
use forum_types::events::ForumEvent;

use crate::messages::{find_message, group_reactions};
use crate::state::{AppState, require_access, run_db};

/// Toggle the caller's reaction and broadcast the message's full reaction
/// list, so every client can apply it as an absolute value.
pub async fn toggle_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ToggleReactionRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let emoji = req.emoji.trim().to_string();
    if emoji.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let row = find_message(&state, &message_id).await?;
    require_access(&state, &claims, &row.event_id).await?;

    let mid = message_id.clone();
    let uid = claims.sub.to_string();
    let uname = claims.name.clone();
    let reaction_rows = run_db(&state, move |db| {
        db.toggle_reaction(&mid, &uid, &uname, &emoji)?;
        db.get_reactions_for_messages(std::slice::from_ref(&mid))
    })
    .await?;

    let reactions = group_reactions(reaction_rows)
        .remove(&message_id)
        .unwrap_or_default();

    state.dispatcher.publish(&ForumEvent::ReactionUpdated {
        event_id: row.event_id.into(),
        message_id: message_id.into(),
        reactions: reactions.clone(),
    });

    Ok(Json(ReactionsResponse { reactions }))
}
