//! Operator surface: agents, commands, meetings and sync control.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use tracing::info;

use crate::api::{
    auth::ensure_admin_authorized,
    state::AppState,
    types::{
        AgentView, ApiResult, CreateMeetingRequest, CreateMeetingResponse, EnqueueRequest,
        EnqueueResponse, ExpireResponse, ListQuery, RecordingRequest, RecordingResponse,
        RenameRequest, StatusResponse, SyncResponse,
    },
};
use crate::domain::{Command, CommandStatus, Meeting, MeetingStatus, UpstreamMeeting};
use crate::dispatch::protocol::OkResponse;
use crate::error::RelayError;

const DEFAULT_LIST_LIMIT: i64 = 100;
const MAX_LIST_LIMIT: i64 = 1000;

fn list_limit(requested: Option<i64>) -> i64 {
    requested.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

/// GET /admin/agents
pub async fn list_agents(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Vec<AgentView>> {
    ensure_admin_authorized(&state, &headers)?;
    let agents = state.dispatch.registry().list().await?;
    Ok(Json(agents.into_iter().map(AgentView::from).collect()))
}

/// PUT /admin/agents/:id/name
pub async fn rename_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(agent_id): Path<i64>,
    body: Result<Json<RenameRequest>, JsonRejection>,
) -> ApiResult<OkResponse> {
    ensure_admin_authorized(&state, &headers)?;
    let Json(req) = body?;
    let name = req.display_name.trim();
    if name.is_empty() {
        return Err(RelayError::Validation("display_name cannot be empty".to_string()).into());
    }
    state.dispatch.registry().rename(agent_id, name).await?;
    Ok(Json(OkResponse::ok()))
}

/// POST /admin/commands
pub async fn enqueue_command(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<EnqueueRequest>, JsonRejection>,
) -> ApiResult<EnqueueResponse> {
    ensure_admin_authorized(&state, &headers)?;
    let Json(req) = body?;
    let command_id = state
        .dispatch
        .enqueue(req.agent_id, req.action, &req.payload)
        .await?;
    Ok(Json(EnqueueResponse {
        ok: true,
        command_id,
    }))
}

/// GET /admin/commands/:id
pub async fn get_command(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(command_id): Path<i64>,
) -> ApiResult<Command> {
    ensure_admin_authorized(&state, &headers)?;
    Ok(Json(state.dispatch.queue().get(command_id).await?))
}

/// GET /admin/agents/:id/commands?status=&limit=
pub async fn list_agent_commands(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(agent_id): Path<i64>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Vec<Command>> {
    ensure_admin_authorized(&state, &headers)?;
    let Query(query) = query?;
    let status = query
        .status
        .as_deref()
        .map(str::parse::<CommandStatus>)
        .transpose()
        .map_err(RelayError::Validation)?;

    state.dispatch.registry().get(agent_id).await?;
    let commands = state
        .dispatch
        .queue()
        .list_for_agent(agent_id, status, list_limit(query.limit))
        .await?;
    Ok(Json(commands))
}

/// POST /admin/agents/:id/recording
///
/// Enqueues every alternative action needed to reach the intent.
pub async fn recording_intent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(agent_id): Path<i64>,
    body: Result<Json<RecordingRequest>, JsonRejection>,
) -> ApiResult<RecordingResponse> {
    ensure_admin_authorized(&state, &headers)?;
    let Json(req) = body?;
    let command_ids = state.dispatch.enqueue_recording(agent_id, req.intent).await?;
    Ok(Json(RecordingResponse {
        ok: true,
        command_ids,
    }))
}

/// GET /admin/meetings?status=&limit=
pub async fn list_meetings(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Vec<Meeting>> {
    ensure_admin_authorized(&state, &headers)?;
    let Query(query) = query?;
    let status = query
        .status
        .as_deref()
        .map(str::parse::<MeetingStatus>)
        .transpose()
        .map_err(RelayError::Validation)?;

    let meetings = state
        .reconciler
        .meetings()
        .list(status, list_limit(query.limit))
        .await?;
    Ok(Json(meetings))
}

/// POST /admin/meetings
///
/// Direct-scheduling insert; the next reconciliation keeps the row.
pub async fn create_meeting(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CreateMeetingRequest>, JsonRejection>,
) -> ApiResult<CreateMeetingResponse> {
    ensure_admin_authorized(&state, &headers)?;
    let Json(req) = body?;
    if req.join_url.trim().is_empty() {
        return Err(RelayError::Validation("join_url is required".to_string()).into());
    }

    let meeting = UpstreamMeeting {
        external_id: req.external_id.trim().to_string(),
        topic: req
            .topic
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "(No topic)".to_string()),
        start_time: req.start_time,
        join_url: req.join_url.trim().to_string(),
    };
    let created_by = req.created_by.as_deref().unwrap_or("admin");
    let meeting_id = state.reconciler.record_local(&meeting, created_by).await?;

    Ok(Json(CreateMeetingResponse {
        ok: true,
        meeting_id,
    }))
}

/// POST /admin/sync
pub async fn sync_now(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<SyncResponse> {
    ensure_admin_authorized(&state, &headers)?;
    let stats = state.reconciler.sync_now().await;
    info!(%stats, "Manual sync finished");
    Ok(Json(SyncResponse { ok: true, stats }))
}

/// POST /admin/expire
pub async fn expire_now(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<ExpireResponse> {
    ensure_admin_authorized(&state, &headers)?;
    let expired = state.reconciler.expiry().expire(Utc::now()).await?;
    Ok(Json(ExpireResponse { ok: true, expired }))
}

/// GET /admin/status
pub async fn system_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<StatusResponse> {
    ensure_admin_authorized(&state, &headers)?;
    let database_connected = state.store.ping().await;
    let agents = state.dispatch.registry().count().await.unwrap_or(0);
    state.links.purge_expired(Utc::now());

    Ok(Json(StatusResponse {
        ok: true,
        uptime_secs: state.uptime_seconds(),
        database_connected,
        agents,
        sweeper_failed_total: state.sweeper.total_failed(),
        live_links: state.links.len(),
        last_sync: state.reconciler.last_report().await,
    }))
}
