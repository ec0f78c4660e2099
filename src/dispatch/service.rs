//! Long-poll register/poll/report protocol on top of the registry and queue.

use chrono::Utc;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::protocol::{RegisterRequest, RegisterResponse, ReportRequest};
use super::{AgentRegistry, CommandQueue};
use crate::config::DispatchConfig;
use crate::domain::{Action, Agent, AgentCandidate, Command, CommandStatus, Outcome, RecordingIntent};
use crate::error::{RelayError, Result};

#[derive(Clone)]
pub struct DispatchService {
    registry: AgentRegistry,
    queue: CommandQueue,
    config: DispatchConfig,
}

impl DispatchService {
    pub fn new(registry: AgentRegistry, queue: CommandQueue, config: DispatchConfig) -> Self {
        Self {
            registry,
            queue,
            config,
        }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub async fn handle_register(&self, req: RegisterRequest) -> Result<RegisterResponse> {
        let os_type = required(&req.os_type, "os_type")?;
        let client_version = required(&req.client_version, "client_version")?;
        let base_url = required(&req.base_url, "base_url")?;

        let api_key = req
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        let candidate = AgentCandidate {
            display_name: non_empty(req.name),
            base_url,
            api_key: Some(api_key.clone()),
            os_type,
            hostname: non_empty(req.hostname),
            ip_address: non_empty(req.ip_address),
            client_version,
        };

        let agent_id = self.registry.register(&candidate, Utc::now()).await?;
        Ok(RegisterResponse {
            ok: true,
            agent_id,
            api_key,
        })
    }

    /// Resolve the agent and check the presented key.
    pub async fn authenticate(&self, agent_id: i64, api_key: Option<&str>) -> Result<Agent> {
        let agent = self.registry.get(agent_id).await?;
        if !agent.accepts_key(api_key) {
            return Err(RelayError::Auth(format!("api key mismatch for agent {agent_id}")));
        }
        Ok(agent)
    }

    /// Hold the poll open until work is reserved or the wait budget elapses.
    #[instrument(skip(self, api_key))]
    pub async fn handle_poll(
        &self,
        agent_id: i64,
        api_key: Option<&str>,
        wait: Duration,
    ) -> Result<Vec<Command>> {
        self.authenticate(agent_id, api_key).await?;
        self.registry.touch(agent_id, Utc::now()).await;

        let deadline = Instant::now() + wait;
        let interval = self.config.poll_interval();

        loop {
            let reserved = self.queue.reserve_pending(agent_id, Utc::now()).await?;
            if !reserved.is_empty() {
                return Ok(reserved);
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(agent_id, "Poll wait budget exhausted");
                return Ok(Vec::new());
            }
            tokio::time::sleep(interval.min(deadline - now)).await;
        }
    }

    #[instrument(skip(self, api_key, req), fields(agent_id = req.agent_id, command_id = req.command_id))]
    pub async fn handle_report(&self, req: ReportRequest, api_key: Option<&str>) -> Result<()> {
        self.authenticate(req.agent_id, api_key).await?;

        let status: CommandStatus = req.status.parse().map_err(RelayError::Validation)?;
        let outcome = match status {
            CommandStatus::Done => Outcome::Done { result: req.result },
            CommandStatus::Failed => {
                let error = req
                    .error
                    .or_else(|| {
                        req.result
                            .as_ref()
                            .and_then(|r| r.get("error"))
                            .and_then(Value::as_str)
                            .map(str::to_string)
                    })
                    .unwrap_or_else(|| "reported failed".to_string());
                Outcome::Failed {
                    result: req.result,
                    error,
                }
            }
            other => {
                return Err(RelayError::Validation(format!(
                    "report status must be done or failed, got {other}"
                )))
            }
        };

        let command = self.queue.get(req.command_id).await?;
        if command.agent_id != req.agent_id {
            return Err(RelayError::NotFound(format!(
                "command {} for agent {}",
                req.command_id, req.agent_id
            )));
        }

        self.queue.finalize(req.command_id, &outcome, Utc::now()).await
    }

    pub async fn enqueue(&self, agent_id: i64, action: Action, payload: &Value) -> Result<i64> {
        self.queue.enqueue(agent_id, action, payload, Utc::now()).await
    }

    /// Enqueue the alternative commands that reach a recording state from an unknown one.
    pub async fn enqueue_recording(&self, agent_id: i64, intent: RecordingIntent) -> Result<Vec<i64>> {
        let mut ids = Vec::new();
        for action in intent.actions() {
            ids.push(self.enqueue(agent_id, *action, &Value::Object(Default::default())).await?);
        }
        info!(agent_id, ?intent, commands = ?ids, "Recording intent enqueued");
        Ok(ids)
    }
}

fn required(value: &str, field: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(RelayError::Validation(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SqliteStore;
    use serde_json::json;

    async fn service(poll_interval_ms: u64) -> DispatchService {
        let store = SqliteStore::in_memory().await.unwrap();
        let config = DispatchConfig {
            poll_interval_ms,
            ..DispatchConfig::default()
        };
        DispatchService::new(
            AgentRegistry::new(store.clone()),
            CommandQueue::new(store),
            config,
        )
    }

    fn register_body(api_key: Option<&str>) -> RegisterRequest {
        RegisterRequest {
            name: None,
            os_type: "darwin".to_string(),
            hostname: Some("mac-mini".to_string()),
            ip_address: None,
            client_version: "2.0.1".to_string(),
            api_key: api_key.map(str::to_string),
            base_url: "http://10.1.1.5:8765".to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_requires_identity_fields() {
        let svc = service(50).await;
        let mut body = register_body(None);
        body.os_type = "  ".to_string();
        let err = svc.handle_register(body).await.unwrap_err();
        assert!(matches!(err, RelayError::Validation(msg) if msg.contains("os_type")));
    }

    #[tokio::test]
    async fn test_register_generates_key_when_missing() {
        let svc = service(50).await;
        let resp = svc.handle_register(register_body(None)).await.unwrap();
        assert_eq!(resp.agent_id, 1);
        assert_eq!(resp.api_key.len(), 32);

        let echoed = svc.handle_register(register_body(Some("mine"))).await.unwrap();
        assert_eq!(echoed.api_key, "mine");
    }

    #[tokio::test]
    async fn test_poll_rejects_wrong_key_and_unknown_agent() {
        let svc = service(50).await;
        let resp = svc.handle_register(register_body(Some("good"))).await.unwrap();

        let wrong = svc
            .handle_poll(resp.agent_id, Some("bad"), Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(wrong, RelayError::Auth(_)));

        let missing = svc.handle_poll(77, Some("good"), Duration::ZERO).await.unwrap_err();
        assert!(matches!(missing, RelayError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_poll_delivers_command_enqueued_mid_wait() {
        let svc = service(50).await;
        let resp = svc.handle_register(register_body(Some("k"))).await.unwrap();
        let agent_id = resp.agent_id;

        let producer = svc.clone();
        let enqueue = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            producer
                .enqueue(agent_id, Action::OpenUrl, &json!({"url": "https://example.test"}))
                .await
                .unwrap()
        });

        let started = std::time::Instant::now();
        let commands = svc
            .handle_poll(agent_id, Some("k"), Duration::from_secs(5))
            .await
            .unwrap();
        let command_id = enqueue.await.unwrap();

        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].id, command_id);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_report_validates_status_and_ownership() {
        let svc = service(50).await;
        let a = svc.handle_register(register_body(Some("a"))).await.unwrap().agent_id;
        let b = svc.handle_register(register_body(Some("b"))).await.unwrap().agent_id;
        let id = svc.enqueue(a, Action::RecordingStop, &json!({})).await.unwrap();
        svc.handle_poll(a, Some("a"), Duration::ZERO).await.unwrap();

        let report = |agent_id, status: &str| ReportRequest {
            agent_id,
            command_id: id,
            status: status.to_string(),
            result: Some(json!({"error": "window not focused"})),
            error: None,
        };

        let bad_status = svc.handle_report(report(a, "running"), Some("a")).await;
        assert!(matches!(bad_status, Err(RelayError::Validation(_))));

        let foreign = svc.handle_report(report(b, "done"), Some("b")).await;
        assert!(matches!(foreign, Err(RelayError::NotFound(_))));

        svc.handle_report(report(a, "failed"), Some("a")).await.unwrap();
        let command = svc.queue().get(id).await.unwrap();
        assert_eq!(command.status, CommandStatus::Failed);
        assert_eq!(command.error.as_deref(), Some("window not focused"));

        let again = svc.handle_report(report(a, "done"), Some("a")).await;
        assert!(matches!(again, Err(RelayError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_enqueue_recording_issues_alternatives() {
        let svc = service(50).await;
        let agent = svc.handle_register(register_body(Some("k"))).await.unwrap().agent_id;
        let ids = svc.enqueue_recording(agent, RecordingIntent::Start).await.unwrap();
        assert_eq!(ids.len(), 2);

        let delivered = svc.handle_poll(agent, Some("k"), Duration::ZERO).await.unwrap();
        let actions: Vec<Action> = delivered.iter().map(|c| c.action).collect();
        assert_eq!(actions, vec![Action::RecordingStart, Action::RecordingResume]);
    }
}
