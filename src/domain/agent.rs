use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered host agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: i64,
    /// Assigned by an operator after registration
    pub display_name: Option<String>,
    /// Local command surface of the agent, when reachable
    pub base_url: String,
    /// Shared secret checked on poll/report
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub os_type: String,
    pub hostname: Option<String>,
    pub ip_address: Option<String>,
    pub client_version: String,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl Agent {
    /// Returns true when the presented key satisfies this agent's credential.
    ///
    /// Agents registered without a key accept any caller.
    pub fn accepts_key(&self, presented: Option<&str>) -> bool {
        match self.api_key.as_deref() {
            None => true,
            Some(expected) => presented.map(str::trim) == Some(expected),
        }
    }

    /// Label shown to operators
    pub fn label(&self) -> String {
        self.display_name
            .clone()
            .or_else(|| self.hostname.clone())
            .unwrap_or_else(|| format!("agent-{}", self.id))
    }
}

/// Identity and telemetry supplied by an agent when it registers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentCandidate {
    pub display_name: Option<String>,
    pub base_url: String,
    pub api_key: Option<String>,
    pub os_type: String,
    pub hostname: Option<String>,
    pub ip_address: Option<String>,
    pub client_version: String,
}
