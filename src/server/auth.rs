use axum::{
    extract::{Query, Request, State},
    http::{header, HeaderMap, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use super::AppState;
use crate::error::ApiError;
use crate::models::Identity;

/// Authenticated user, added to request extensions after auth
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub id: Identity,
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Finds the session token in the `Authorization` header or, failing that,
/// the `token` query parameter.
pub(super) fn bearer_token(headers: &HeaderMap, uri: &Uri) -> Result<String, ApiError> {
    match headers.get(header::AUTHORIZATION) {
        Some(value) => {
            let value = value
                .to_str()
                .map_err(|_| ApiError::Unauthorized("malformed Authorization header".to_string()))?;
            match value.strip_prefix("Bearer ") {
                Some(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
                _ => Err(ApiError::Unauthorized(
                    "Authorization header must use Bearer scheme".to_string(),
                )),
            }
        }
        None => Query::<TokenQuery>::try_from_uri(uri)
            .ok()
            .and_then(|Query(q)| q.token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("auth header is empty".to_string())),
    }
}

/// Authentication middleware
pub(super) async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match bearer_token(request.headers(), request.uri()) {
        Ok(token) => token,
        Err(e) => return e.into_response(),
    };

    match state.sessions.verify(&token) {
        Ok(id) => {
            request.extensions_mut().insert(AuthUser { id });
            next.run(request).await
        }
        Err(e) => {
            tracing::debug!("rejected session token: {}", e);
            ApiError::from(e).into_response()
        }
    }
}
