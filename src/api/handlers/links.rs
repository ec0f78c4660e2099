use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::HeaderMap,
    Json,
};
use serde_json::json;
use tracing::info;

use crate::api::{
    auth::ensure_admin_authorized,
    state::AppState,
    types::{ApiResult, CreateLinkRequest, CreateLinkResponse, DispatchLinkRequest, EnqueueResponse},
};
use crate::domain::Action;
use crate::error::RelayError;

/// POST /admin/links
pub async fn create_link(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CreateLinkRequest>, JsonRejection>,
) -> ApiResult<CreateLinkResponse> {
    ensure_admin_authorized(&state, &headers)?;
    let Json(req) = body?;

    let url = url::Url::parse(req.url.trim())
        .map_err(|e| RelayError::Validation(format!("invalid url: {e}")))?;
    let token = state.links.issue(url.to_string());

    Ok(Json(CreateLinkResponse {
        ok: true,
        token,
        expires_in_secs: state.links.ttl_secs(),
    }))
}

/// POST /admin/links/:token/dispatch
///
/// Consumes the token and enqueues `open_url` for its URL.
pub async fn dispatch_link(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(token): Path<String>,
    body: Result<Json<DispatchLinkRequest>, JsonRejection>,
) -> ApiResult<EnqueueResponse> {
    ensure_admin_authorized(&state, &headers)?;
    let Json(req) = body?;

    // resolve the agent before consuming the token so a typo does not burn it
    state.dispatch.registry().get(req.agent_id).await?;

    let url = state
        .links
        .take(token.trim())
        .ok_or_else(|| RelayError::NotFound(format!("link token {token} is unknown or expired")))?;

    let command_id = state
        .dispatch
        .enqueue(req.agent_id, Action::OpenUrl, &json!({ "url": url }))
        .await?;
    info!(agent_id = req.agent_id, command_id, "Dispatched link");

    Ok(Json(EnqueueResponse {
        ok: true,
        command_id,
    }))
}
