//! HTTP surface of the Pantree API.
//!
//! # Endpoints
//!
//! - `GET /health`: health check (no auth)
//! - `POST /requestOtp`, `POST /login`: passwordless login (no auth)
//! - `GET /auth/refresh_token`: exchange a token inside its refresh window
//! - `GET /api/users/me`, `POST /api/users/updateMe`
//! - `POST /api/sync`, `POST /api/sync/snapshot`, `GET /api/hash`
//!
//! Everything under `/api` requires a session token, passed as
//! `Authorization: Bearer <token>` or as the `token` query parameter.

mod auth;
mod handlers;

pub use auth::AuthUser;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::auth::{
    BucketEncoding, Clock, ConsumedOtpLedger, OtpAuthenticator, OtpError, OtpHasher, ServerSecret,
    SessionError, SessionIssuer,
};
use crate::config::Config;
use crate::db::{SqliteIdentityStore, SqliteItemStore};
use crate::email::EmailSender;
use crate::store::{IdentityStore, ItemStore};
use crate::sync::SyncService;

/// Failures wiring the application together at startup.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Invalid OTP secret: {0}")]
    Otp(#[from] OtpError),
    #[error("Invalid session key: {0}")]
    Session(#[from] SessionError),
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub authenticator: Arc<OtpAuthenticator>,
    pub sessions: Arc<SessionIssuer>,
    pub sync: Arc<SyncService>,
    pub identities: Arc<dyn IdentityStore>,
    /// Present when OTP codes are delivered by email.
    pub mailer: Option<EmailSender>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Builds the state from configuration on top of an initialized pool.
    pub fn new(config: &Config, pool: SqlitePool, clock: Arc<dyn Clock>) -> Result<Self, StartupError> {
        let secret = ServerSecret::new(config.secret.as_bytes());
        let encoding = if config.otp.legacy_bucket_encoding {
            tracing::warn!("Using legacy low-byte bucket encoding for OTP digests");
            BucketEncoding::LegacyLowByte
        } else {
            BucketEncoding::FullWidth
        };
        let hasher = OtpHasher::with_encoding(&secret, encoding)?;

        let identities: Arc<dyn IdentityStore> = Arc::new(SqliteIdentityStore::new(pool.clone()));
        let items: Arc<dyn ItemStore> = Arc::new(SqliteItemStore::new(pool));

        let mut authenticator = OtpAuthenticator::new(hasher, clock.clone(), identities.clone());
        if config.otp.single_use {
            authenticator = authenticator.with_ledger(Arc::new(ConsumedOtpLedger::new()));
        }

        let sessions = SessionIssuer::new(config.session_key().as_bytes(), clock.clone())?
            .with_timeout(config.session.timeout())
            .with_max_refresh(config.session.max_refresh());

        let mailer = if config.server.send_mail {
            config.email.clone().map(EmailSender::new)
        } else {
            None
        };

        Ok(Self {
            authenticator: Arc::new(authenticator),
            sessions: Arc::new(sessions),
            sync: Arc::new(SyncService::new(items, identities.clone(), clock.clone())),
            identities,
            mailer,
            clock,
        })
    }
}

/// Builds the router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Public routes (no auth)
    let public_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/requestOtp", post(handlers::request_otp))
        .route("/login", post(handlers::login))
        // Validates the token itself so expired tokens can still be refreshed.
        .route("/auth/refresh_token", get(handlers::refresh_token));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/api/users/me", get(handlers::me))
        .route("/api/users/updateMe", post(handlers::update_me))
        .route("/api/sync", post(handlers::sync))
        .route("/api/sync/snapshot", post(handlers::sync_snapshot))
        .route("/api/hash", get(handlers::state_hash))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Periodically drops consumed OTPs past their window and idle sync locks.
pub fn spawn_maintenance(state: AppState, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let otps = state
                .authenticator
                .ledger()
                .map_or(0, |ledger| ledger.cleanup_expired(state.clock.now_millis()));
            let locks = state.sync.prune_locks().await;
            if otps > 0 || locks > 0 {
                tracing::debug!(otps, locks, "maintenance pass");
            }
        }
    })
}
