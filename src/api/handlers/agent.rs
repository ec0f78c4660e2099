//! Agent wire protocol: register, long-poll and report.

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Query, State},
    http::HeaderMap,
    Json,
};

use crate::api::{
    auth::bearer_token,
    state::AppState,
    types::{ApiError, ApiResult, PollQuery},
};
use crate::dispatch::protocol::{
    OkResponse, PollResponse, RegisterRequest, RegisterResponse, ReportRequest,
};
use crate::error::RelayError;

/// POST /agent/register
pub async fn register_agent(
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<RegisterResponse> {
    let Json(req) = body?;
    let response = state.dispatch.handle_register(req).await?;
    Ok(Json(response))
}

/// GET /agent/poll?agent_id=&wait=
///
/// Held open until a command is reserved or the wait budget runs out.
pub async fn poll_commands(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<PollQuery>, QueryRejection>,
) -> ApiResult<PollResponse> {
    let Query(query) = query?;
    let agent_id = parse_agent_id(query.agent_id.as_deref())?;
    let wait = state.dispatch.config().wait_budget(query.wait);

    let commands = state
        .dispatch
        .handle_poll(agent_id, bearer_token(&headers), wait)
        .await?;

    Ok(Json(PollResponse {
        ok: true,
        commands: commands.into_iter().map(Into::into).collect(),
    }))
}

/// POST /agent/report
pub async fn report_result(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ReportRequest>, JsonRejection>,
) -> ApiResult<OkResponse> {
    let Json(req) = body?;
    state
        .dispatch
        .handle_report(req, bearer_token(&headers))
        .await?;
    Ok(Json(OkResponse::ok()))
}

fn parse_agent_id(raw: Option<&str>) -> Result<i64, ApiError> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return Err(RelayError::Validation("agent_id is required".to_string()).into());
    }
    raw.parse::<i64>()
        .map_err(|_| RelayError::Validation(format!("agent_id must be an integer, got {raw}")).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_agent_id() {
        assert_eq!(parse_agent_id(Some(" 12 ")).unwrap(), 12);
        assert!(parse_agent_id(None).is_err());
        assert!(parse_agent_id(Some("")).is_err());
        assert!(parse_agent_id(Some("abc")).is_err());
    }
}
