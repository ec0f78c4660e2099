use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Principal recorded as `created_by` for rows inserted by reconciliation
pub const SYNC_PRINCIPAL: &str = "sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeetingStatus {
    Active,
    Expired,
    Deleted,
}

impl MeetingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeetingStatus::Active => "active",
            MeetingStatus::Expired => "expired",
            MeetingStatus::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for MeetingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MeetingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(MeetingStatus::Active),
            "expired" => Ok(MeetingStatus::Expired),
            "deleted" => Ok(MeetingStatus::Deleted),
            other => Err(format!("unknown meeting status: {other}")),
        }
    }
}

/// Local cache entry of an upstream-scheduled meeting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meeting {
    pub id: i64,
    pub external_id: String,
    pub topic: String,
    pub start_time: DateTime<Utc>,
    pub join_url: String,
    pub status: MeetingStatus,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
}

impl Meeting {
    /// True when any synced field differs from the upstream record.
    ///
    /// Start times are compared at the millisecond precision they are stored with.
    pub fn differs_from(&self, upstream: &UpstreamMeeting) -> bool {
        self.topic != upstream.topic
            || self.start_time.timestamp_millis() != upstream.start_time.timestamp_millis()
            || self.join_url != upstream.join_url
    }
}

/// A meeting as reported by the authoritative scheduling service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamMeeting {
    pub external_id: String,
    pub topic: String,
    pub start_time: DateTime<Utc>,
    pub join_url: String,
}

/// Counters produced by one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub added: u32,
    pub updated: u32,
    pub deleted: u32,
    pub expired: u32,
    pub errors: u32,
}

impl SyncStats {
    /// Number of rows the pass changed
    pub fn changes(&self) -> u32 {
        self.added + self.updated + self.deleted + self.expired
    }
}

impl std::fmt::Display for SyncStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "added={} updated={} deleted={} expired={} errors={}",
            self.added, self.updated, self.deleted, self.expired, self.errors
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_differs_from_compares_synced_fields_only() {
        let start = Utc::now() + Duration::hours(2);
        let local = Meeting {
            id: 1,
            external_id: "m-1".to_string(),
            topic: "Standup".to_string(),
            start_time: start,
            join_url: "https://meet.example/1".to_string(),
            status: MeetingStatus::Active,
            created_by: SYNC_PRINCIPAL.to_string(),
            updated_at: Utc::now(),
        };
        let mut upstream = UpstreamMeeting {
            external_id: "m-1".to_string(),
            topic: "Standup".to_string(),
            start_time: start,
            join_url: "https://meet.example/1".to_string(),
        };
        assert!(!local.differs_from(&upstream));

        upstream.start_time = start + Duration::minutes(15);
        assert!(local.differs_from(&upstream));
    }
}
