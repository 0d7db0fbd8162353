use axum::{
    extract::State,
    http::{HeaderMap, Uri},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::auth::{bearer_token, AuthUser};
use super::AppState;
use crate::auth::{normalize_email, SignedSession, INTERVAL_MS, WINDOW};
use crate::error::ApiError;
use crate::models::{MeasureType, ProfileUpdate, SyncItem, User};
use crate::sync::{Snapshot, SnapshotOutcome};

#[derive(Serialize)]
pub(super) struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check endpoint (no auth required)
pub(super) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub(super) async fn not_found() -> ApiError {
    ApiError::NotFound("Page not found".to_string())
}

#[derive(Deserialize)]
pub(super) struct RequestOtpBody {
    email: String,
}

#[derive(Serialize)]
pub(super) struct HashResponse<T> {
    hash: T,
}

/// Issues an OTP. The code goes to the user; the digest goes back to the
/// client, which presents both at login.
pub(super) async fn request_otp(
    State(state): State<AppState>,
    Json(body): Json<RequestOtpBody>,
) -> Result<Json<HashResponse<String>>, ApiError> {
    let issued = state.authenticator.issue(&body.email)?;

    match &state.mailer {
        Some(mailer) => {
            let minutes = WINDOW * INTERVAL_MS / 60_000;
            mailer
                .send_otp(&issued.email, &issued.code, minutes)
                .await
                .map_err(|e| ApiError::Internal(e.to_string()))?;
        }
        None => tracing::info!("DEV: OTP is {} for email {}", issued.code, issued.email),
    }

    tracing::info!("OTP requested for {}", issued.email);

    Ok(Json(HashResponse {
        hash: issued.digest.to_hex(),
    }))
}

#[derive(Deserialize)]
pub(super) struct LoginBody {
    email: String,
    otp: String,
    hash: String,
}

pub(super) async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginBody>,
) -> Result<Json<SignedSession>, ApiError> {
    let identity = state
        .authenticator
        .authenticate(&body.email, &body.otp, &body.hash)
        .await?;
    Ok(Json(state.sessions.issue(identity)))
}

pub(super) async fn refresh_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Json<SignedSession>, ApiError> {
    let token = bearer_token(&headers, &uri)?;
    Ok(Json(state.sessions.refresh(&token)?))
}

pub(super) async fn me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<User>, ApiError> {
    state
        .identities
        .get(user.id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("user not found".to_string()))
}

/// Fields left empty are not changed.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct UpdateMeBody {
    #[serde(default)]
    email: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    pref_measure: String,
}

impl UpdateMeBody {
    fn into_update(self) -> Result<ProfileUpdate, ApiError> {
        let email = match self.email.trim() {
            "" => None,
            email => Some(normalize_email(email)?),
        };
        let name = Some(self.name.trim().to_string()).filter(|n| !n.is_empty());
        let pref_measure = match self.pref_measure.trim() {
            "" => None,
            measure => Some(measure.parse::<MeasureType>().map_err(ApiError::BadRequest)?),
        };
        Ok(ProfileUpdate {
            email,
            name,
            pref_measure,
        })
    }
}

#[derive(Serialize)]
pub(super) struct MessageResponse {
    message: &'static str,
}

pub(super) async fn update_me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<UpdateMeBody>,
) -> Result<Json<MessageResponse>, ApiError> {
    let update = body.into_update()?;
    if !update.is_empty() {
        state.identities.update(user.id, &update).await?;
        tracing::info!(user = %user.id, "updated profile");
    }
    Ok(Json(MessageResponse { message: "Success" }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SyncBody {
    items: Vec<SyncItem>,
    #[serde(default)]
    last_sync_time: Option<DateTime<Utc>>,
}

/// Delta push: merges the sent items and returns everything the client has
/// not seen since its last sync.
pub(super) async fn sync(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<SyncBody>,
) -> Result<Json<Vec<SyncItem>>, ApiError> {
    let changes = state
        .sync
        .push_changes(user.id, body.items, body.last_sync_time)
        .await?;
    Ok(Json(changes))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SnapshotBody {
    items: Vec<SyncItem>,
    #[serde(default)]
    profile: Option<User>,
    #[serde(default)]
    last_sync_time: Option<DateTime<Utc>>,
}

pub(super) async fn sync_snapshot(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<SnapshotBody>,
) -> Result<Json<SnapshotOutcome>, ApiError> {
    if let Some(profile) = &body.profile {
        if profile.id != user.id {
            return Err(ApiError::Forbidden(
                "profile belongs to another user".to_string(),
            ));
        }
    }

    let local = Snapshot {
        items: body.items,
        profile: body.profile,
    };
    let outcome = state
        .sync
        .push_snapshot(user.id, local, body.last_sync_time)
        .await?;
    Ok(Json(outcome))
}

pub(super) async fn state_hash(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<HashResponse<u32>>, ApiError> {
    let hash = state.sync.state_hash(user.id).await?;
    Ok(Json(HashResponse { hash }))
}
