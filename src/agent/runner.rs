//! Register, long-poll and report loop of the host agent.

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::driver::CommandExecutor;
use super::server::HostInfo;
use crate::config::AgentConfig;
use crate::dispatch::protocol::{
    PollResponse, RegisterRequest, RegisterResponse, ReportRequest, WireCommand,
};
use crate::error::{RelayError, Result};

/// Slack on top of the poll wait before the HTTP client gives up
const POLL_TIMEOUT_SLACK_SECS: u64 = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub agent_id: i64,
    pub api_key: String,
}

pub struct AgentRunner {
    http: Client,
    config: AgentConfig,
    executor: CommandExecutor,
    info: HostInfo,
}

impl AgentRunner {
    pub fn new(config: AgentConfig, executor: CommandExecutor, info: HostInfo) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(
                config.poll_wait_secs + POLL_TIMEOUT_SLACK_SECS,
            ))
            .build()?;

        Ok(Self {
            http,
            config,
            executor,
            info,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.server_url.trim_end_matches('/'), path)
    }

    fn register_request(&self) -> RegisterRequest {
        let host = self.info.ip_address.as_deref().unwrap_or("127.0.0.1");
        RegisterRequest {
            name: self.config.name.clone(),
            os_type: self.info.os_type.clone(),
            hostname: self.info.hostname.clone(),
            ip_address: self.info.ip_address.clone(),
            client_version: self.info.client_version.clone(),
            api_key: self.config.api_key.clone(),
            base_url: format!("http://{}:{}", host, self.config.listen_port),
        }
    }

    pub async fn register(&self) -> Result<Registration> {
        let resp = self
            .http
            .post(self.url("/agent/register"))
            .json(&self.register_request())
            .send()
            .await?;
        let body: RegisterResponse = decode(resp).await?;

        info!(agent_id = body.agent_id, "Registered with relay server");
        Ok(Registration {
            agent_id: body.agent_id,
            api_key: body.api_key,
        })
    }

    pub async fn poll(&self, reg: &Registration) -> Result<Vec<WireCommand>> {
        let resp = self
            .http
            .get(self.url("/agent/poll"))
            .query(&[
                ("agent_id", reg.agent_id.to_string()),
                ("wait", self.config.poll_wait_secs.to_string()),
            ])
            .bearer_auth(&reg.api_key)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RelayError::Timeout(format!("poll for agent {}", reg.agent_id))
                } else {
                    RelayError::Http(e)
                }
            })?;
        let body: PollResponse = decode(resp).await?;
        Ok(body.commands)
    }

    /// Execute one command and build its report
    pub async fn execute(&self, reg: &Registration, command: &WireCommand) -> ReportRequest {
        match self.executor.execute(command.action, &command.payload).await {
            Ok(result) => ReportRequest {
                agent_id: reg.agent_id,
                command_id: command.id,
                status: "done".to_string(),
                result: Some(result),
                error: None,
            },
            Err(e) => {
                warn!(command_id = command.id, action = %command.action, "Command failed: {}", e);
                ReportRequest {
                    agent_id: reg.agent_id,
                    command_id: command.id,
                    status: "failed".to_string(),
                    result: Some(json!({ "error": e.to_string() })),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub async fn report(&self, reg: &Registration, report: &ReportRequest) -> Result<()> {
        let resp = self
            .http
            .post(self.url("/agent/report"))
            .bearer_auth(&reg.api_key)
            .json(report)
            .send()
            .await?;
        let _: serde_json::Value = decode(resp).await?;
        Ok(())
    }

    /// Poll until shutdown, re-registering when the server forgets this agent
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let retry = Duration::from_secs(self.config.retry_delay_secs);
        let mut registration: Option<Registration> = None;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let reg = match &registration {
                Some(reg) => reg.clone(),
                None => match self.register().await {
                    Ok(reg) => {
                        registration = Some(reg.clone());
                        reg
                    }
                    Err(e) => {
                        error!("Registration failed: {}", e);
                        if wait_or_shutdown(retry, &mut shutdown).await {
                            break;
                        }
                        continue;
                    }
                },
            };

            let polled = tokio::select! {
                polled = self.poll(&reg) => polled,
                _ = shutdown.changed() => break,
            };

            match polled {
                Ok(commands) => {
                    if !commands.is_empty() {
                        debug!(count = commands.len(), "Commands received");
                    }
                    for command in &commands {
                        let report = self.execute(&reg, command).await;
                        if let Err(e) = self.report(&reg, &report).await {
                            error!(command_id = command.id, "Failed to report result: {}", e);
                        }
                    }
                }
                Err(RelayError::Timeout(what)) => {
                    debug!("{} timed out client-side, polling again", what);
                }
                Err(RelayError::Auth(msg)) | Err(RelayError::NotFound(msg)) => {
                    warn!("Server rejected registration ({}), re-registering", msg);
                    registration = None;
                }
                Err(e) => {
                    error!("Poll failed: {}", e);
                    if wait_or_shutdown(retry, &mut shutdown).await {
                        break;
                    }
                }
            }
        }

        info!("Agent poll loop stopped");
    }
}

/// Sleep for `delay`; true when shutdown fired first
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = shutdown.changed() => true,
    }
}

/// Decode a success body, mapping the server's error statuses back onto `RelayError`
async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }

    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or(text);

    Err(match status {
        StatusCode::BAD_REQUEST => RelayError::Validation(message),
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => RelayError::Auth(message),
        StatusCode::NOT_FOUND => RelayError::NotFound(message),
        StatusCode::CONFLICT => RelayError::Conflict(message),
        _ => RelayError::Upstream(format!("HTTP {}: {}", status.as_u16(), message)),
    })
}
