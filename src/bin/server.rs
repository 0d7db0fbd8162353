//! Pantree API Server
//!
//! Serves OTP login, session refresh, profile, and pantry sync endpoints.
//!
//! # Configuration
//!
//! Read from `~/.config/pantree/config.yaml` (or the path in `PANTREE_CONFIG`),
//! overridden by environment variables:
//! - `PANTREE_SECRET`: key for OTP digests (required)
//! - `PANTREE_DATABASE_PATH`: SQLite database file
//! - `PANTREE_BIND` / `PANTREE_PORT`: listen address (default: 0.0.0.0:8080)
//! - `PANTREE_SEND_MAIL`: deliver OTP codes by email instead of logging them
//! - `PANTREE_SESSION_KEY`: session signing key (defaults to the secret)

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pantree::auth::SystemClock;
use pantree::db::init_db;
use pantree::server::{build_router, spawn_maintenance, AppState};
use pantree::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pantree=info,pantree_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::var("PANTREE_CONFIG").ok().map(PathBuf::from);
    let config = Config::load(config_path)?;

    tracing::info!("Database: {}", config.database_path.display());
    let pool = init_db(&config.database_path).await?;

    let state = AppState::new(&config, pool, Arc::new(SystemClock))?;
    if state.mailer.is_none() {
        tracing::warn!("Email delivery disabled; OTP codes will be logged");
    }

    spawn_maintenance(state.clone(), Duration::from_secs(600));

    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
