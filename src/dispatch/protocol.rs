//! Wire bodies of the agent register/poll/report protocol.
//!
//! Shared by the server handlers and the host agent's poll runner.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Action, Command, CommandStatus};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub os_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub client_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub ok: bool,
    pub agent_id: i64,
    pub api_key: String,
}

/// A reserved command as handed to the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireCommand {
    pub id: i64,
    pub action: Action,
    pub payload: Value,
    pub status: CommandStatus,
}

impl From<Command> for WireCommand {
    fn from(c: Command) -> Self {
        Self {
            id: c.id,
            action: c.action,
            payload: c.payload,
            status: c.status,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollResponse {
    pub ok: bool,
    pub commands: Vec<WireCommand>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRequest {
    pub agent_id: i64,
    pub command_id: i64,
    pub status: String,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    pub fn ok() -> Self {
        Self { ok: true }
    }
}
