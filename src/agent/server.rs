//! Local command surface of the host agent.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::UdpSocket;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::driver::CommandExecutor;
use crate::api::auth::bearer_token;
use crate::api::types::ApiResult;
use crate::domain::Action;
use crate::error::RelayError;

/// Identity reported on registration and by /ping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub os_type: String,
    pub hostname: Option<String>,
    pub ip_address: Option<String>,
    pub client_version: String,
}

impl HostInfo {
    pub fn detect(os_type: &str) -> Self {
        Self {
            os_type: os_type.to_string(),
            hostname: detect_hostname(),
            ip_address: detect_ip(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

fn detect_hostname() -> Option<String> {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
}

/// Address of the interface that routes outward. Connecting a UDP socket sends nothing.
fn detect_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    Some(socket.local_addr().ok()?.ip().to_string())
}

#[derive(Clone)]
pub struct AgentServerState {
    pub executor: CommandExecutor,
    pub api_key: Option<Arc<str>>,
    pub info: Arc<HostInfo>,
}

#[derive(Debug, Deserialize)]
pub struct LocalCommand {
    pub action: Action,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LocalCommandResponse {
    pub ok: bool,
    pub result: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PingResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub info: HostInfo,
}

/// POST /command
async fn run_command(
    State(state): State<AgentServerState>,
    headers: HeaderMap,
    body: Result<Json<LocalCommand>, JsonRejection>,
) -> ApiResult<LocalCommandResponse> {
    if let Some(expected) = state.api_key.as_deref() {
        if bearer_token(&headers) != Some(expected) {
            return Err(RelayError::Auth("invalid agent api key".to_string()).into());
        }
    }
    let Json(cmd) = body?;

    info!(action = %cmd.action, "Local command received");
    let result = state
        .executor
        .execute(cmd.action, &Value::Object(cmd.payload))
        .await?;

    Ok(Json(LocalCommandResponse { ok: true, result }))
}

/// GET /ping
async fn ping(State(state): State<AgentServerState>) -> Json<PingResponse> {
    Json(PingResponse {
        ok: true,
        info: state.info.as_ref().clone(),
    })
}

pub fn create_agent_router(state: AgentServerState) -> Router {
    Router::new()
        .route("/command", post(run_command))
        .route("/ping", get(ping))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::driver::MockInputDriver;
    use crate::agent::HostOs;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::json;
    use tower::ServiceExt;

    fn state(driver: MockInputDriver) -> AgentServerState {
        AgentServerState {
            executor: CommandExecutor::new(Arc::new(driver), HostOs::Linux),
            api_key: Some(Arc::from("k1")),
            info: Arc::new(HostInfo {
                os_type: "linux".to_string(),
                hostname: Some("desk-1".to_string()),
                ip_address: Some("10.0.0.5".to_string()),
                client_version: "1.0.0".to_string(),
            }),
        }
    }

    fn command_request(key: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/command")
            .header("content-type", "application/json");
        if let Some(key) = key {
            builder = builder.header("authorization", format!("Bearer {key}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_ping_reports_host_info() {
        let app = create_agent_router(state(MockInputDriver::new()));
        let response = app
            .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["hostname"], "desk-1");
        assert_eq!(body["client_version"], "1.0.0");
    }

    #[tokio::test]
    async fn test_command_requires_agent_key() {
        let app = create_agent_router(state(MockInputDriver::new()));
        let response = app
            .oneshot(command_request(Some("wrong"), json!({"action": "recording_start"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(response).await["ok"], false);
    }

    #[tokio::test]
    async fn test_command_executes_with_flattened_payload() {
        let mut driver = MockInputDriver::new();
        driver
            .expect_open_url()
            .withf(|url| url == "https://meet.example/9")
            .times(1)
            .returning(|_| Ok(()));
        let app = create_agent_router(state(driver));

        let response = app
            .oneshot(command_request(
                Some("k1"),
                json!({"action": "start_meeting_session", "join_url": "https://meet.example/9"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["result"]["opened"], "https://meet.example/9");
    }

    #[tokio::test]
    async fn test_unknown_action_is_rejected() {
        let app = create_agent_router(state(MockInputDriver::new()));
        let response = app
            .oneshot(command_request(Some("k1"), json!({"action": "format_disk"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
