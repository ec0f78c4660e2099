use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::domain::{Action, Agent, RecordingIntent, SyncStats};
use crate::error::RelayError;
use crate::sync::SyncReport;

// ============================================================================
// Errors
// ============================================================================

/// Error returned by every handler, rendered as `{ok:false, error}`
#[derive(Debug)]
pub struct ApiError(pub RelayError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            RelayError::Validation(_) => StatusCode::BAD_REQUEST,
            RelayError::Auth(_) => StatusCode::FORBIDDEN,
            RelayError::NotFound(_) => StatusCode::NOT_FOUND,
            RelayError::Conflict(_) => StatusCode::CONFLICT,
            RelayError::Upstream(_) | RelayError::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl<E: Into<RelayError>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if self.0.is_client_error() {
            debug!("Request rejected: {}", self.0);
        } else {
            error!("Request failed: {}", self.0);
        }
        (status, Json(json!({ "ok": false, "error": self.0.to_string() }))).into_response()
    }
}

impl From<JsonRejection> for RelayError {
    fn from(rejection: JsonRejection) -> Self {
        RelayError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for RelayError {
    fn from(rejection: QueryRejection) -> Self {
        RelayError::Validation(rejection.body_text())
    }
}

pub type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

// ============================================================================
// Agent protocol
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PollQuery {
    pub agent_id: Option<String>,
    pub wait: Option<u64>,
}

// ============================================================================
// Admin
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub status: String,
    pub uptime_secs: i64,
    pub agents: i64,
}

#[derive(Debug, Serialize)]
pub struct AgentView {
    pub label: String,
    #[serde(flatten)]
    pub agent: Agent,
}

impl From<Agent> for AgentView {
    fn from(agent: Agent) -> Self {
        Self {
            label: agent.label(),
            agent,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub agent_id: i64,
    pub action: Action,
    #[serde(default = "empty_object")]
    pub payload: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub ok: bool,
    pub command_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct RecordingRequest {
    pub intent: RecordingIntent,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordingResponse {
    pub ok: bool,
    pub command_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMeetingRequest {
    pub external_id: String,
    #[serde(default)]
    pub topic: Option<String>,
    pub start_time: DateTime<Utc>,
    pub join_url: String,
    #[serde(default)]
    pub created_by: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateMeetingResponse {
    pub ok: bool,
    pub meeting_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SyncResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub stats: SyncStats,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExpireResponse {
    pub ok: bool,
    pub expired: u64,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub ok: bool,
    pub uptime_secs: i64,
    pub database_connected: bool,
    pub agents: i64,
    pub sweeper_failed_total: u64,
    pub live_links: usize,
    pub last_sync: Option<SyncReport>,
}

#[derive(Debug, Deserialize)]
pub struct CreateLinkRequest {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateLinkResponse {
    pub ok: bool,
    pub token: String,
    pub expires_in_secs: i64,
}

#[derive(Debug, Deserialize)]
pub struct DispatchLinkRequest {
    pub agent_id: i64,
}
