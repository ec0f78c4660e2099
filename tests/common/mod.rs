#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Utc};
use meetrelay::{
    adapters::SqliteStore,
    api::{create_router, AppState},
    config::AppConfig,
    domain::UpstreamMeeting,
    error::{RelayError, Result},
    sync::{MeetingSource, SnapshotRecord},
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

/// Upstream stand-in whose snapshot tests can swap between passes
#[derive(Default)]
pub struct FakeSource {
    snapshot: Mutex<Vec<SnapshotRecord>>,
    failing: Mutex<bool>,
}

impl FakeSource {
    pub fn set(&self, meetings: Vec<UpstreamMeeting>) {
        *self.snapshot.lock().unwrap() = meetings.into_iter().map(SnapshotRecord::Valid).collect();
    }

    pub fn fail(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

#[async_trait]
impl MeetingSource for FakeSource {
    async fn fetch(&self, _from: DateTime<Utc>, _to: DateTime<Utc>) -> Result<Vec<SnapshotRecord>> {
        if *self.failing.lock().unwrap() {
            return Err(RelayError::Upstream("HTTP 503: unavailable".to_string()));
        }
        Ok(self.snapshot.lock().unwrap().clone())
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub source: Arc<FakeSource>,
}

pub async fn test_app() -> TestApp {
    test_app_with(|_| {}).await
}

pub async fn test_app_with(configure: impl FnOnce(&mut AppConfig)) -> TestApp {
    let mut config = AppConfig::default_config("sqlite::memory:");
    config.dispatch.poll_interval_ms = 100;
    configure(&mut config);

    let store = SqliteStore::in_memory().await.expect("in-memory database");
    let source = Arc::new(FakeSource::default());
    let state = AppState::new(store, &config, source.clone());

    TestApp {
        router: create_router(state.clone()),
        state,
        source,
    }
}

pub async fn send_json(
    app: &Router,
    method: Method,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request_builder = Request::builder().method(method).uri(uri);
    for (key, value) in headers {
        request_builder = request_builder.header(*key, *value);
    }

    let request = if let Some(payload) = body {
        request_builder
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .expect("failed to build json request")
    } else {
        request_builder
            .body(Body::empty())
            .expect("failed to build empty request")
    };

    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("router request failed");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

/// Register a host agent, returning (agent_id, api_key)
pub async fn register(app: &Router, hostname: &str) -> (i64, String) {
    let (status, body) = send_json(
        app,
        Method::POST,
        "/agent/register",
        &[],
        Some(json!({
            "os_type": "linux",
            "hostname": hostname,
            "ip_address": "10.0.0.5",
            "client_version": "1.0.0",
            "base_url": "http://10.0.0.5:8765"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "register failed: {body}");
    (
        body["agent_id"].as_i64().expect("agent_id"),
        body["api_key"].as_str().expect("api_key").to_string(),
    )
}

pub async fn poll(app: &Router, agent_id: i64, api_key: &str, wait: u64) -> (StatusCode, Value) {
    let auth = format!("Bearer {api_key}");
    send_json(
        app,
        Method::GET,
        &format!("/agent/poll?agent_id={agent_id}&wait={wait}"),
        &[("authorization", auth.as_str())],
        None,
    )
    .await
}

pub async fn report(app: &Router, api_key: &str, body: Value) -> (StatusCode, Value) {
    let auth = format!("Bearer {api_key}");
    send_json(
        app,
        Method::POST,
        "/agent/report",
        &[("authorization", auth.as_str())],
        Some(body),
    )
    .await
}

pub async fn enqueue(app: &Router, agent_id: i64, action: &str, payload: Value) -> i64 {
    let (status, body) = send_json(
        app,
        Method::POST,
        "/admin/commands",
        &[],
        Some(json!({ "agent_id": agent_id, "action": action, "payload": payload })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "enqueue failed: {body}");
    body["command_id"].as_i64().expect("command_id")
}

pub fn upstream(id: &str, start: DateTime<Utc>) -> UpstreamMeeting {
    UpstreamMeeting {
        external_id: id.to_string(),
        topic: format!("Meeting {id}"),
        start_time: start,
        join_url: format!("https://meet.example/{id}"),
    }
}
