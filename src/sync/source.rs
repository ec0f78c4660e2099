//! Authoritative meeting snapshot provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::domain::UpstreamMeeting;
use crate::error::Result;

/// One record of an upstream snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotRecord {
    Valid(UpstreamMeeting),
    /// Could not be interpreted; the id is kept when readable so the local
    /// copy is not mistaken for a deletion.
    Malformed {
        external_id: Option<String>,
        reason: String,
    },
}

impl SnapshotRecord {
    pub fn external_id(&self) -> Option<&str> {
        match self {
            SnapshotRecord::Valid(m) => Some(&m.external_id),
            SnapshotRecord::Malformed { external_id, .. } => external_id.as_deref(),
        }
    }

    /// Interpret a raw upstream JSON meeting object
    pub fn from_json(raw: &Value) -> Self {
        let external_id = match raw.get("id") {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        let Some(id) = external_id.clone() else {
            return SnapshotRecord::Malformed {
                external_id: None,
                reason: "missing id".to_string(),
            };
        };

        let malformed = |reason: &str| SnapshotRecord::Malformed {
            external_id: external_id.clone(),
            reason: reason.to_string(),
        };

        let Some(start) = raw.get("start_time").and_then(Value::as_str) else {
            return malformed("missing start_time");
        };
        let Ok(start_time) = DateTime::parse_from_rfc3339(start) else {
            return malformed("start_time is not RFC 3339");
        };
        let Some(join_url) = raw
            .get("join_url")
            .and_then(Value::as_str)
            .filter(|u| !u.trim().is_empty())
        else {
            return malformed("missing join_url");
        };

        let topic = raw
            .get("topic")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or("(No topic)");

        SnapshotRecord::Valid(UpstreamMeeting {
            external_id: id,
            topic: topic.to_string(),
            start_time: start_time.with_timezone(&Utc),
            join_url: join_url.trim().to_string(),
        })
    }
}

/// Source of the authoritative meeting snapshot for a time window.
///
/// An `Err` means the whole snapshot is unavailable; per-record problems are
/// reported as `SnapshotRecord::Malformed` instead.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MeetingSource: Send + Sync {
    async fn fetch(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<SnapshotRecord>>;
}
