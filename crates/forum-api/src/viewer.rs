use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use forum_types::api::{AccessResponse, Claims, ViewerResponse};

use crate::state::{AppState, run_db};

/// Identity of the token holder.
pub async fn me(Extension(claims): Extension<Claims>) -> impl IntoResponse {
    Json(ViewerResponse {
        id: claims.sub,
        name: claims.name,
        role: claims.role,
    })
}

/// The caller's access to an event's forum. `none` is a valid answer, not an error.
pub async fn event_access(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let uid = claims.sub.to_string();
    let access = run_db(&state, move |db| db.get_access(&event_id, &uid)).await?;
    Ok(Json(AccessResponse { access }))
}
