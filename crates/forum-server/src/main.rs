use std::path::PathBuf;

use tracing::info;

use forum_server::{ServerConfig, app_state, build_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "forum=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    // Init database
    let db = forum_db::Database::open(&PathBuf::from(&config.db_path))?;

    let app = build_router(app_state(db, config.jwt_secret.clone()));

    let addr = config.addr()?;
    info!("Forum server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
