//! Agent registry: identity, credentials and liveness of host agents.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, info, instrument, warn};

use crate::adapters::sqlite::{from_millis, from_millis_opt, to_millis};
use crate::adapters::SqliteStore;
use crate::domain::{Agent, AgentCandidate};
use crate::error::{RelayError, Result};

const AGENT_COLUMNS: &str = "id, display_name, base_url, api_key, os_type, hostname, \
     ip_address, client_version, created_at, last_seen_at";

#[derive(Clone)]
pub struct AgentRegistry {
    store: SqliteStore,
}

impl AgentRegistry {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }

    /// Register an agent, returning its id.
    ///
    /// Registration is idempotent per api_key: a restarted agent presenting a
    /// known key gets its telemetry refreshed and keeps its id.
    #[instrument(skip(self, candidate), fields(os = %candidate.os_type))]
    pub async fn register(&self, candidate: &AgentCandidate, now: DateTime<Utc>) -> Result<i64> {
        // A known api_key refreshes the existing row; NULL keys never conflict.
        let (id, created_at): (i64, i64) = sqlx::query_as(
            r#"
            INSERT INTO agents (display_name, base_url, api_key, os_type, hostname,
                                ip_address, client_version, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(api_key) DO UPDATE SET
                display_name = COALESCE(excluded.display_name, agents.display_name),
                base_url = excluded.base_url,
                os_type = excluded.os_type,
                hostname = excluded.hostname,
                ip_address = excluded.ip_address,
                client_version = excluded.client_version
            RETURNING id, created_at
            "#,
        )
        .bind(&candidate.display_name)
        .bind(&candidate.base_url)
        .bind(&candidate.api_key)
        .bind(&candidate.os_type)
        .bind(&candidate.hostname)
        .bind(&candidate.ip_address)
        .bind(&candidate.client_version)
        .bind(to_millis(now))
        .fetch_one(self.store.pool())
        .await?;

        if created_at == to_millis(now) {
            info!(agent_id = id, hostname = ?candidate.hostname, "Agent registered");
        } else {
            info!(agent_id = id, "Agent re-registered");
        }
        Ok(id)
    }

    pub async fn get(&self, agent_id: i64) -> Result<Agent> {
        let sql = format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(agent_id)
            .fetch_optional(self.store.pool())
            .await?;

        match row {
            Some(row) => agent_from_row(&row),
            None => Err(RelayError::NotFound(format!("agent {agent_id}"))),
        }
    }

    /// Record liveness. Failures are logged and swallowed.
    pub async fn touch(&self, agent_id: i64, now: DateTime<Utc>) {
        let result = sqlx::query("UPDATE agents SET last_seen_at = ? WHERE id = ?")
            .bind(to_millis(now))
            .bind(agent_id)
            .execute(self.store.pool())
            .await;

        match result {
            Ok(_) => debug!(agent_id, "Agent seen"),
            Err(e) => warn!(agent_id, error = %e, "Failed to update last_seen_at"),
        }
    }

    pub async fn list(&self) -> Result<Vec<Agent>> {
        let sql = format!("SELECT {AGENT_COLUMNS} FROM agents ORDER BY id");
        let rows = sqlx::query(&sql).fetch_all(self.store.pool()).await?;
        rows.iter().map(agent_from_row).collect()
    }

    pub async fn count(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM agents")
            .fetch_one(self.store.pool())
            .await?;
        Ok(count)
    }

    /// Operator-assigned display name
    pub async fn rename(&self, agent_id: i64, display_name: &str) -> Result<()> {
        let affected = sqlx::query("UPDATE agents SET display_name = ? WHERE id = ?")
            .bind(display_name)
            .bind(agent_id)
            .execute(self.store.pool())
            .await?
            .rows_affected();

        if affected == 0 {
            return Err(RelayError::NotFound(format!("agent {agent_id}")));
        }
        info!(agent_id, display_name, "Agent renamed");
        Ok(())
    }
}

fn agent_from_row(row: &SqliteRow) -> Result<Agent> {
    Ok(Agent {
        id: row.try_get("id")?,
        display_name: row.try_get("display_name")?,
        base_url: row.try_get("base_url")?,
        api_key: row.try_get("api_key")?,
        os_type: row.try_get("os_type")?,
        hostname: row.try_get("hostname")?,
        ip_address: row.try_get("ip_address")?,
        client_version: row.try_get("client_version")?,
        created_at: from_millis(row.try_get("created_at")?)?,
        last_seen_at: from_millis_opt(row.try_get("last_seen_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(api_key: Option<&str>) -> AgentCandidate {
        AgentCandidate {
            display_name: None,
            base_url: "http://192.168.1.20:8765".to_string(),
            api_key: api_key.map(str::to_string),
            os_type: "windows".to_string(),
            hostname: Some("studio-pc".to_string()),
            ip_address: Some("192.168.1.20".to_string()),
            client_version: "1.2.0".to_string(),
        }
    }

    async fn registry() -> AgentRegistry {
        AgentRegistry::new(SqliteStore::in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_register_assigns_sequential_ids() {
        let registry = registry().await;
        let first = registry.register(&candidate(Some("k1")), Utc::now()).await.unwrap();
        let second = registry.register(&candidate(Some("k2")), Utc::now()).await.unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(registry.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_register_is_idempotent_per_api_key() {
        let registry = registry().await;
        let id = registry.register(&candidate(Some("k1")), Utc::now()).await.unwrap();

        let mut restarted = candidate(Some("k1"));
        restarted.client_version = "1.3.0".to_string();
        let again = registry.register(&restarted, Utc::now()).await.unwrap();

        assert_eq!(id, again);
        assert_eq!(registry.count().await.unwrap(), 1);
        assert_eq!(registry.get(id).await.unwrap().client_version, "1.3.0");
    }

    #[tokio::test]
    async fn test_concurrent_registration_with_same_key_yields_one_agent() {
        let registry = registry().await;
        let agent = candidate(Some("k1"));
        let now = Utc::now();

        let (a, b) = tokio::join!(registry.register(&agent, now), registry.register(&agent, now));

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(registry.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_keyless_agents_are_not_deduplicated() {
        let registry = registry().await;
        registry.register(&candidate(None), Utc::now()).await.unwrap();
        registry.register(&candidate(None), Utc::now()).await.unwrap();
        assert_eq!(registry.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_get_unknown_agent_is_not_found() {
        let registry = registry().await;
        assert!(matches!(registry.get(42).await, Err(RelayError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_touch_and_rename() {
        let registry = registry().await;
        let id = registry.register(&candidate(Some("k1")), Utc::now()).await.unwrap();
        assert!(registry.get(id).await.unwrap().last_seen_at.is_none());

        registry.touch(id, Utc::now()).await;
        registry.rename(id, "Room 4").await.unwrap();

        let agent = registry.get(id).await.unwrap();
        assert!(agent.last_seen_at.is_some());
        assert_eq!(agent.display_name.as_deref(), Some("Room 4"));
        assert!(matches!(registry.rename(99, "x").await, Err(RelayError::NotFound(_))));

        // touching an unknown agent is not an error for the caller
        registry.touch(99, Utc::now()).await;
    }
}
