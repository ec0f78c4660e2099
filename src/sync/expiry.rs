//! Time-based active -> expired transition.

use chrono::{DateTime, Utc};
use tracing::{error, info};

use super::MeetingStore;
use crate::error::Result;

#[derive(Clone)]
pub struct ExpiryScanner {
    meetings: MeetingStore,
}

impl ExpiryScanner {
    pub fn new(meetings: MeetingStore) -> Self {
        Self { meetings }
    }

    /// Expire every active meeting whose start time is strictly before `now` (UTC).
    pub async fn expire(&self, now: DateTime<Utc>) -> Result<u64> {
        let count = self.meetings.expire_started_before(now).await?;
        if count > 0 {
            info!(count, "Expired past meetings");
        }
        Ok(count)
    }

    /// Like `expire`, logging instead of returning failures
    pub async fn expire_logged(&self, now: DateTime<Utc>) -> u64 {
        self.expire(now).await.unwrap_or_else(|e| {
            error!("Expiry scan failed: {}", e);
            0
        })
    }
}
