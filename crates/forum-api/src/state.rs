use std::sync::Arc;

use axum::http::StatusCode;
use tracing::error;

use forum_db::Database;
use forum_gateway::Dispatcher;
use forum_types::api::Claims;
use forum_types::models::{Access, Role};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
}

/// Run a blocking DB query off the async runtime.
pub async fn run_db<F, T>(state: &AppState, f: F) -> Result<T, StatusCode>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("Database error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

/// The caller's access to an event, or 403 if they have none.
pub async fn require_access(
    state: &AppState,
    claims: &Claims,
    event_id: &str,
) -> Result<Access, StatusCode> {
    let eid = event_id.to_string();
    let uid = claims.sub.to_string();
    let access = run_db(state, move |db| db.get_access(&eid, &uid)).await?;
    if access.can_join() {
        Ok(access)
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}

/// Pin and delete are reserved for the event's organizers and admins.
pub async fn require_moderator(
    state: &AppState,
    claims: &Claims,
    event_id: &str,
) -> Result<(), StatusCode> {
    if claims.role == Role::Admin {
        return Ok(());
    }
    match require_access(state, claims, event_id).await? {
        Access::Organizer => Ok(()),
        _ => Err(StatusCode::FORBIDDEN),
    }
}
