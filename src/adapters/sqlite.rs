use crate::error::{RelayError, Result};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// SQLite storage adapter shared by the registry, queue and meeting cache
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) a SQLite database
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let mut options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        if !database_url.contains(":memory:") {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        info!(url = database_url, "Connected to SQLite");
        Ok(Self { pool })
    }

    /// Private in-memory database with migrations applied.
    ///
    /// A single connection that is never recycled, since every new
    /// connection to `:memory:` would see an empty database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cheap liveness probe
    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

/// Timestamps are stored as epoch milliseconds so range predicates compare numerically.
pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| RelayError::Internal(format!("timestamp out of range: {ms}")))
}

pub(crate) fn from_millis_opt(ms: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    ms.map(from_millis).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_store_is_migrated() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(store.ping().await);

        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('agents', 'commands', 'meetings')",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_millis_roundtrip_truncates_to_millis() {
        let ts = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(from_millis(to_millis(ts)).unwrap(), ts);
    }
}
