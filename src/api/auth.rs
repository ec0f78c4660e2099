use axum::http::{header::AUTHORIZATION, HeaderMap};
use sha2::{Digest, Sha256};

use crate::api::state::AppState;
use crate::error::RelayError;

pub const ADMIN_TOKEN_HEADER: &str = "x-meetrelay-admin-token";

pub fn token_fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.trim().as_bytes());
    hex::encode(hasher.finalize())
}

fn extract_bearer_token(raw: &str) -> Option<&str> {
    raw.strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))
        .map(str::trim)
}

/// Bearer credential from the Authorization header, if any
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer_token)
        .filter(|v| !v.is_empty())
}

/// Admin routes are open when no admin token is configured.
pub fn ensure_admin_authorized(state: &AppState, headers: &HeaderMap) -> Result<(), RelayError> {
    let Some(expected) = state.admin_fingerprint.as_deref() else {
        return Ok(());
    };

    let token = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .or_else(|| bearer_token(headers));

    match token {
        Some(token) if token_fingerprint(token) == expected => Ok(()),
        Some(_) => Err(RelayError::Auth("invalid admin token".to_string())),
        None => Err(RelayError::Auth("admin token required".to_string())),
    }
}
