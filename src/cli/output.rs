//! Output formatting for operator commands.
//!
//! Supports two modes: human-readable tables (default) and JSON (--json).

use chrono::{DateTime, Utc};
use serde::Serialize;
use tabled::{Table, Tabled};

use crate::domain::{Agent, Meeting};

/// Output mode for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Table,
    Json,
}

impl OutputMode {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Table
        }
    }
}

/// Print a vec of Tabled + Serialize items in the chosen mode.
pub fn print_items<T: Tabled + Serialize>(items: &[T], mode: OutputMode) -> anyhow::Result<()> {
    match mode {
        OutputMode::Table => {
            if items.is_empty() {
                println!("(no results)");
            } else {
                let table = Table::new(items).to_string();
                println!("{table}");
            }
        }
        OutputMode::Json => {
            let json = serde_json::to_string_pretty(items)?;
            println!("{json}");
        }
    }
    Ok(())
}

/// Print a single item as pretty JSON
pub fn print_item<T: Serialize>(item: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(item)?);
    Ok(())
}

fn format_time(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

#[derive(Debug, Serialize, Tabled)]
pub struct AgentRow {
    pub id: i64,
    pub name: String,
    pub os: String,
    pub ip: String,
    pub version: String,
    pub last_seen: String,
}

impl From<&Agent> for AgentRow {
    fn from(agent: &Agent) -> Self {
        Self {
            id: agent.id,
            name: agent.label(),
            os: agent.os_type.clone(),
            ip: agent.ip_address.clone().unwrap_or_else(|| "-".to_string()),
            version: agent.client_version.clone(),
            last_seen: format_time(agent.last_seen_at),
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
pub struct MeetingRow {
    pub external_id: String,
    pub topic: String,
    pub start: String,
    pub status: String,
    pub created_by: String,
}

impl From<&Meeting> for MeetingRow {
    fn from(m: &Meeting) -> Self {
        Self {
            external_id: m.external_id.clone(),
            topic: m.topic.clone(),
            start: format_time(Some(m.start_time)),
            status: m.status.to_string(),
            created_by: m.created_by.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_row_uses_label_and_placeholders() {
        let agent = Agent {
            id: 2,
            display_name: None,
            base_url: "http://10.0.0.5:8765".to_string(),
            api_key: None,
            os_type: "macos".to_string(),
            hostname: Some("studio".to_string()),
            ip_address: None,
            client_version: "1.0.0".to_string(),
            created_at: Utc::now(),
            last_seen_at: None,
        };
        let row = AgentRow::from(&agent);
        assert_eq!(row.name, "studio");
        assert_eq!(row.ip, "-");
        assert_eq!(row.last_seen, "-");
    }
}
