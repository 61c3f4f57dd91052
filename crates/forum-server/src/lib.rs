use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use forum_api::middleware::{bearer_token, decode_token, require_auth};
use forum_api::state::{AppState, AppStateInner};
use forum_api::{messages, reactions, unread, viewer};
use forum_db::Database;
use forum_gateway::{Dispatcher, connection};

/// Server settings, read from the environment (and `.env` if present).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub jwt_secret: String,
    pub db_path: String,
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            jwt_secret: std::env::var("FORUM_JWT_SECRET")
                .unwrap_or_else(|_| "dev-secret-change-me".into()),
            db_path: std::env::var("FORUM_DB_PATH").unwrap_or_else(|_| "forum.db".into()),
            host: std::env::var("FORUM_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("FORUM_PORT")
                .unwrap_or_else(|_| "5001".into())
                .parse()?,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

pub fn app_state(db: Database, jwt_secret: String) -> AppState {
    Arc::new(AppStateInner {
        db: Arc::new(db),
        dispatcher: Dispatcher::new(),
        jwt_secret,
    })
}

pub fn build_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/api/me", get(viewer::me))
        .route("/api/events/{event_id}/access", get(viewer::event_access))
        .route("/api/messages", post(messages::create_message))
        // `{id}` is an event id for GET and a message id for DELETE
        .route(
            "/api/messages/{id}",
            get(messages::get_messages).delete(messages::delete_message),
        )
        .route("/api/messages/{id}/unread", get(unread::get_unread))
        .route("/api/messages/{id}/mark-read", post(unread::mark_read))
        .route("/api/messages/{id}/pin", put(messages::toggle_pin))
        .route("/api/messages/{id}/react", post(reactions::toggle_reaction))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    Router::new()
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Authenticate at the HTTP upgrade, then hand the socket to the gateway.
async fn ws_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let claims = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .and_then(|token| decode_token(&state.jwt_secret, token))
        .ok_or_else(|| {
            warn!("Rejected gateway upgrade without a valid token");
            StatusCode::UNAUTHORIZED
        })?;

    let dispatcher = state.dispatcher.clone();
    let db = state.db.clone();
    Ok(ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, db, claims)))
}
