use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use vault_core::VaultError;
use vault_sessions::IssuedToken;

use super::ApiError;
use crate::app::AppState;

fn bearer(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::UNAUTHORIZED,
                VaultError::InvalidSession("missing bearer token".to_string()),
            )
        })
}

/// Verify the `X-Issuer-Key` header against `sessions.issuer_key`.
fn verify_issuer_key(headers: &HeaderMap, expected: Option<&str>) -> Result<(), ApiError> {
    let forbidden = |msg: &str| {
        ApiError::new(StatusCode::FORBIDDEN, VaultError::InvalidSession(msg.to_string()))
    };
    let expected = expected
        .filter(|k| !k.is_empty())
        .ok_or_else(|| forbidden("session issuance is not enabled"))?;
    let presented = headers
        .get("x-issuer-key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| forbidden("missing X-Issuer-Key header"))?;

    if presented == expected {
        Ok(())
    } else {
        Err(forbidden("issuer key mismatch"))
    }
}

/// POST /session — mint (or return the live) token for a user the upstream
/// identity service has already authenticated. Body: `{"username": "..."}`.
pub async fn issue_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<IssuedToken>, ApiError> {
    verify_issuer_key(&headers, state.config.sessions.issuer_key.as_deref())?;
    let username = body["username"].as_str().unwrap_or_default();
    let issued = state.sessions.issue_token(username).await?;
    Ok(Json(issued))
}

/// GET /session — who the bearer token belongs to.
pub async fn current_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let username = state.sessions.validate_token(bearer(&headers)?).await?;
    Ok(Json(json!({ "username": username })))
}

/// POST /session/refresh — swap a valid token for a fresh one.
pub async fn refresh_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<IssuedToken>, ApiError> {
    let issued = state.sessions.refresh_token(bearer(&headers)?).await?;
    Ok(Json(issued))
}

/// POST /session/logout — drop the session from the store.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let revoked = state.sessions.revoke_token(bearer(&headers)?).await?;
    Ok(Json(json!({ "revoked": revoked })))
}
