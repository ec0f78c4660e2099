//! Meeting cache persistence.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, instrument};

use crate::adapters::sqlite::{from_millis, to_millis};
use crate::adapters::SqliteStore;
use crate::domain::{Meeting, MeetingStatus, UpstreamMeeting};
use crate::error::{RelayError, Result};

const MEETING_COLUMNS: &str =
    "id, external_id, topic, start_time, join_url, status, created_by, updated_at";

#[derive(Clone)]
pub struct MeetingStore {
    store: SqliteStore,
}

impl MeetingStore {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }

    pub async fn active(&self) -> Result<Vec<Meeting>> {
        self.list(Some(MeetingStatus::Active), i64::MAX).await
    }

    /// Meetings ordered by start time, optionally filtered by status
    pub async fn list(&self, status: Option<MeetingStatus>, limit: i64) -> Result<Vec<Meeting>> {
        let sql = format!(
            "SELECT {MEETING_COLUMNS} FROM meetings \
             WHERE (? IS NULL OR status = ?) ORDER BY start_time, id LIMIT ?"
        );
        let status = status.map(|s| s.as_str());
        let rows = sqlx::query(&sql)
            .bind(status)
            .bind(status)
            .bind(limit)
            .fetch_all(self.store.pool())
            .await?;

        rows.iter().map(meeting_from_row).collect()
    }

    pub async fn get_by_external_id(&self, external_id: &str) -> Result<Option<Meeting>> {
        let sql = format!("SELECT {MEETING_COLUMNS} FROM meetings WHERE external_id = ?");
        let row = sqlx::query(&sql)
            .bind(external_id)
            .fetch_optional(self.store.pool())
            .await?;

        row.as_ref().map(meeting_from_row).transpose()
    }

    #[instrument(skip(self, meeting), fields(external_id = %meeting.external_id))]
    pub async fn insert(
        &self,
        meeting: &UpstreamMeeting,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO meetings (external_id, topic, start_time, join_url, status, created_by, updated_at)
            VALUES (?, ?, ?, ?, 'active', ?, ?)
            RETURNING id
            "#,
        )
        .bind(&meeting.external_id)
        .bind(&meeting.topic)
        .bind(to_millis(meeting.start_time))
        .bind(&meeting.join_url)
        .bind(created_by)
        .bind(to_millis(now))
        .fetch_one(self.store.pool())
        .await?;

        debug!(meeting_id = id, "Meeting inserted");
        Ok(id)
    }

    /// Overwrite synced fields and status, provided the row is still in `expected`.
    ///
    /// Returns false when a concurrent writer changed the status first.
    pub async fn overwrite(
        &self,
        id: i64,
        expected: MeetingStatus,
        meeting: &UpstreamMeeting,
        status: MeetingStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = sqlx::query(
            r#"
            UPDATE meetings
            SET topic = ?, start_time = ?, join_url = ?, status = ?, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(&meeting.topic)
        .bind(to_millis(meeting.start_time))
        .bind(&meeting.join_url)
        .bind(status.as_str())
        .bind(to_millis(now))
        .bind(id)
        .bind(expected.as_str())
        .execute(self.store.pool())
        .await?
        .rows_affected();

        Ok(affected == 1)
    }

    /// Mark an active meeting deleted unless it was written after `fetched_at`
    pub async fn mark_deleted_unless_touched(
        &self,
        id: i64,
        fetched_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = sqlx::query(
            "UPDATE meetings SET status = 'deleted', updated_at = ? \
             WHERE id = ? AND status = 'active' AND updated_at <= ?",
        )
        .bind(to_millis(now))
        .bind(id)
        .bind(to_millis(fetched_at))
        .execute(self.store.pool())
        .await?
        .rows_affected();

        Ok(affected == 1)
    }

    /// Mark every active meeting that started before `now` as expired
    pub async fn expire_started_before(&self, now: DateTime<Utc>) -> Result<u64> {
        let affected = sqlx::query(
            "UPDATE meetings SET status = 'expired', updated_at = ? \
             WHERE status = 'active' AND start_time < ?",
        )
        .bind(to_millis(now))
        .bind(to_millis(now))
        .execute(self.store.pool())
        .await?
        .rows_affected();

        Ok(affected)
    }

    /// Insert or revive a meeting written outside reconciliation
    pub async fn upsert_active(
        &self,
        meeting: &UpstreamMeeting,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO meetings (external_id, topic, start_time, join_url, status, created_by, updated_at)
            VALUES (?, ?, ?, ?, 'active', ?, ?)
            ON CONFLICT (external_id) DO UPDATE SET
                topic = excluded.topic,
                start_time = excluded.start_time,
                join_url = excluded.join_url,
                status = 'active',
                created_by = excluded.created_by,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(&meeting.external_id)
        .bind(&meeting.topic)
        .bind(to_millis(meeting.start_time))
        .bind(&meeting.join_url)
        .bind(created_by)
        .bind(to_millis(now))
        .fetch_one(self.store.pool())
        .await?;

        Ok(id)
    }
}

fn meeting_from_row(row: &SqliteRow) -> Result<Meeting> {
    let status: String = row.try_get("status")?;
    Ok(Meeting {
        id: row.try_get("id")?,
        external_id: row.try_get("external_id")?,
        topic: row.try_get("topic")?,
        start_time: from_millis(row.try_get("start_time")?)?,
        join_url: row.try_get("join_url")?,
        status: status.parse().map_err(RelayError::Internal)?,
        created_by: row.try_get("created_by")?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
    })
}
