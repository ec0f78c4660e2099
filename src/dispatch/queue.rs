//! Command queue with compare-and-swap reservation and finalization.
//!
//! Every state change is a single conditional `UPDATE ... WHERE status = ?`,
//! so concurrent pollers, reporters and the sweeper never both win the same
//! transition.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::types::Json;
use sqlx::Row;
use tracing::{debug, info, instrument, warn};

use crate::adapters::sqlite::{from_millis, from_millis_opt, to_millis};
use crate::adapters::SqliteStore;
use crate::domain::{Action, Command, CommandStatus, Outcome};
use crate::error::{RelayError, Result};

const COMMAND_COLUMNS: &str =
    "id, agent_id, action, payload, status, created_at, started_at, finished_at, result, error";

#[derive(Clone)]
pub struct CommandQueue {
    store: SqliteStore,
}

impl CommandQueue {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }

    #[instrument(skip(self, payload))]
    pub async fn enqueue(
        &self,
        agent_id: i64,
        action: Action,
        payload: &Value,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let known: Option<i64> = sqlx::query_scalar("SELECT id FROM agents WHERE id = ?")
            .bind(agent_id)
            .fetch_optional(self.store.pool())
            .await?;
        if known.is_none() {
            return Err(RelayError::NotFound(format!("agent {agent_id}")));
        }

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO commands (agent_id, action, payload, status, created_at)
            VALUES (?, ?, ?, 'pending', ?)
            RETURNING id
            "#,
        )
        .bind(agent_id)
        .bind(action.as_str())
        .bind(Json(payload))
        .bind(to_millis(now))
        .fetch_one(self.store.pool())
        .await?;

        info!(command_id = id, agent_id, action = %action, "Command enqueued");
        Ok(id)
    }

    /// Reserve every pending command of an agent, flipping each to running.
    ///
    /// Only rows this caller actually flipped are returned.
    pub async fn reserve_pending(&self, agent_id: i64, now: DateTime<Utc>) -> Result<Vec<Command>> {
        let candidates: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM commands WHERE agent_id = ? AND status = 'pending' ORDER BY id",
        )
        .bind(agent_id)
        .fetch_all(self.store.pool())
        .await?;

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "UPDATE commands SET status = 'running', started_at = ? \
             WHERE id = ? AND status = 'pending' RETURNING {COMMAND_COLUMNS}"
        );

        let mut reserved = Vec::with_capacity(candidates.len());
        for id in candidates {
            let row = sqlx::query(&sql)
                .bind(to_millis(now))
                .bind(id)
                .fetch_optional(self.store.pool())
                .await?;

            match row {
                Some(row) => reserved.push(command_from_row(&row)?),
                None => debug!(command_id = id, "Command claimed by another poller"),
            }
        }

        if !reserved.is_empty() {
            info!(agent_id, count = reserved.len(), "Reserved commands");
        }
        Ok(reserved)
    }

    /// Terminal write, only from `running`.
    ///
    /// A command that is already done or failed is left untouched and the
    /// call fails with `Conflict`; a still-pending command cannot be finalized
    /// either, since no agent has received it.
    #[instrument(skip(self, outcome), fields(status = %outcome.status()))]
    pub async fn finalize(
        &self,
        command_id: i64,
        outcome: &Outcome,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let (status, result, error) = match outcome {
            Outcome::Done { result } => (CommandStatus::Done, result.as_ref(), None),
            Outcome::Failed { result, error } => {
                (CommandStatus::Failed, result.as_ref(), Some(error.as_str()))
            }
        };

        let affected = sqlx::query(
            r#"
            UPDATE commands
            SET status = ?, result = ?, error = ?, finished_at = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(status.as_str())
        .bind(result.map(Json))
        .bind(error)
        .bind(to_millis(now))
        .bind(command_id)
        .execute(self.store.pool())
        .await?
        .rows_affected();

        if affected == 1 {
            info!(command_id, status = %status, "Command finalized");
            return Ok(());
        }

        let current = self.get(command_id).await?;
        warn!(
            command_id,
            current = %current.status,
            requested = %status,
            "Rejected finalize of non-running command"
        );
        Err(RelayError::Conflict(format!(
            "command {command_id} is {}, not running",
            current.status
        )))
    }

    /// Fail every running command reserved before `cutoff` with error "timeout".
    pub async fn sweep_timed_out(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64> {
        let stuck: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM commands WHERE status = 'running' AND started_at < ? ORDER BY id",
        )
        .bind(to_millis(cutoff))
        .fetch_all(self.store.pool())
        .await?;

        let timeout = Outcome::timeout();
        let mut failed = 0;
        for id in stuck {
            match self.finalize(id, &timeout, now).await {
                Ok(()) => {
                    warn!(command_id = id, "Command timed out");
                    failed += 1;
                }
                // reported between the select and the update
                Err(RelayError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(failed)
    }

    pub async fn get(&self, command_id: i64) -> Result<Command> {
        let sql = format!("SELECT {COMMAND_COLUMNS} FROM commands WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(command_id)
            .fetch_optional(self.store.pool())
            .await?;

        match row {
            Some(row) => command_from_row(&row),
            None => Err(RelayError::NotFound(format!("command {command_id}"))),
        }
    }

    /// Commands of one agent, newest first, optionally filtered by status
    pub async fn list_for_agent(
        &self,
        agent_id: i64,
        status: Option<CommandStatus>,
        limit: i64,
    ) -> Result<Vec<Command>> {
        let sql = format!(
            "SELECT {COMMAND_COLUMNS} FROM commands \
             WHERE agent_id = ? AND (? IS NULL OR status = ?) \
             ORDER BY id DESC LIMIT ?"
        );
        let status = status.map(|s| s.as_str());
        let rows = sqlx::query(&sql)
            .bind(agent_id)
            .bind(status)
            .bind(status)
            .bind(limit)
            .fetch_all(self.store.pool())
            .await?;

        rows.iter().map(command_from_row).collect()
    }
}

fn command_from_row(row: &SqliteRow) -> Result<Command> {
    let action: String = row.try_get("action")?;
    let status: String = row.try_get("status")?;
    let payload: Json<Value> = row.try_get("payload")?;
    let result: Option<Json<Value>> = row.try_get("result")?;

    Ok(Command {
        id: row.try_get("id")?,
        agent_id: row.try_get("agent_id")?,
        action: action.parse().map_err(RelayError::Internal)?,
        payload: payload.0,
        status: status.parse().map_err(RelayError::Internal)?,
        created_at: from_millis(row.try_get("created_at")?)?,
        started_at: from_millis_opt(row.try_get("started_at")?)?,
        finished_at: from_millis_opt(row.try_get("finished_at")?)?,
        result: result.map(|r| r.0),
        error: row.try_get("error")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::AgentRegistry;
    use crate::domain::AgentCandidate;
    use chrono::Duration;
    use serde_json::json;

    async fn setup() -> (CommandQueue, i64) {
        let store = SqliteStore::in_memory().await.unwrap();
        let registry = AgentRegistry::new(store.clone());
        let agent_id = registry
            .register(
                &AgentCandidate {
                    base_url: "http://127.0.0.1:8765".to_string(),
                    api_key: Some("k".to_string()),
                    os_type: "linux".to_string(),
                    client_version: "1.0.0".to_string(),
                    ..Default::default()
                },
                Utc::now(),
            )
            .await
            .unwrap();
        (CommandQueue::new(store), agent_id)
    }

    #[tokio::test]
    async fn test_enqueue_for_unknown_agent_is_not_found() {
        let (queue, _) = setup().await;
        let err = queue
            .enqueue(99, Action::OpenUrl, &json!({}), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_reserve_flips_pending_to_running_once() {
        let (queue, agent) = setup().await;
        let payload = json!({"url": "https://example.test"});
        let id = queue.enqueue(agent, Action::OpenUrl, &payload, Utc::now()).await.unwrap();

        let pending = queue.get(id).await.unwrap();
        assert_eq!(pending.status, CommandStatus::Pending);
        assert!(pending.started_at.is_none());

        let reserved = queue.reserve_pending(agent, Utc::now()).await.unwrap();
        assert_eq!(reserved.len(), 1);
        assert_eq!(reserved[0].id, id);
        assert_eq!(reserved[0].status, CommandStatus::Running);
        assert_eq!(reserved[0].payload, payload);
        assert!(reserved[0].started_at.is_some());

        assert!(queue.reserve_pending(agent, Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_reservations_never_share_a_command() {
        let (queue, agent) = setup().await;
        for i in 0..20 {
            queue
                .enqueue(agent, Action::RawHotkey, &json!({"keys": ["f", i.to_string()]}), Utc::now())
                .await
                .unwrap();
        }

        let (a, b) = tokio::join!(
            queue.reserve_pending(agent, Utc::now()),
            queue.reserve_pending(agent, Utc::now())
        );
        let mut ids: Vec<i64> = a.unwrap().into_iter().chain(b.unwrap()).map(|c| c.id).collect();
        ids.sort_unstable();
        let before = ids.len();
        ids.dedup();

        assert_eq!(before, 20);
        assert_eq!(ids.len(), 20);
    }

    #[tokio::test]
    async fn test_finalize_is_monotonic() {
        let (queue, agent) = setup().await;
        let id = queue.enqueue(agent, Action::RecordingStart, &json!({}), Utc::now()).await.unwrap();

        // pending commands cannot be finalized
        let early = queue.finalize(id, &Outcome::Done { result: None }, Utc::now()).await;
        assert!(matches!(early, Err(RelayError::Conflict(_))));

        queue.reserve_pending(agent, Utc::now()).await.unwrap();
        queue.finalize(id, &Outcome::timeout(), Utc::now()).await.unwrap();

        let late = queue
            .finalize(id, &Outcome::Done { result: Some(json!({"ok": true})) }, Utc::now())
            .await;
        assert!(matches!(late, Err(RelayError::Conflict(_))));

        let command = queue.get(id).await.unwrap();
        assert_eq!(command.status, CommandStatus::Failed);
        assert_eq!(command.error.as_deref(), Some("timeout"));
        assert!(command.result.is_none());
        assert!(command.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_sweep_fails_only_stale_running_commands() {
        let (queue, agent) = setup().await;
        let start = Utc::now();
        let stale = queue.enqueue(agent, Action::OpenUrl, &json!({}), start).await.unwrap();
        queue.reserve_pending(agent, start).await.unwrap();

        let fresh_at = start + Duration::seconds(100);
        let fresh = queue.enqueue(agent, Action::OpenUrl, &json!({}), fresh_at).await.unwrap();
        queue.reserve_pending(agent, fresh_at).await.unwrap();
        let pending = queue.enqueue(agent, Action::OpenUrl, &json!({}), start).await.unwrap();

        let now = start + Duration::seconds(150);
        let swept = queue
            .sweep_timed_out(now - Duration::seconds(120), now)
            .await
            .unwrap();

        assert_eq!(swept, 1);
        assert_eq!(queue.get(stale).await.unwrap().status, CommandStatus::Failed);
        assert_eq!(queue.get(fresh).await.unwrap().status, CommandStatus::Running);
        assert_eq!(queue.get(pending).await.unwrap().status, CommandStatus::Pending);
    }

    #[tokio::test]
    async fn test_list_for_agent_filters_by_status() {
        let (queue, agent) = setup().await;
        queue.enqueue(agent, Action::OpenUrl, &json!({}), Utc::now()).await.unwrap();
        queue.reserve_pending(agent, Utc::now()).await.unwrap();
        queue.enqueue(agent, Action::OpenUrl, &json!({}), Utc::now()).await.unwrap();

        let all = queue.list_for_agent(agent, None, 10).await.unwrap();
        let running = queue
            .list_for_agent(agent, Some(CommandStatus::Running), 10)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(running.len(), 1);
        assert_eq!(all[0].status, CommandStatus::Pending);
    }
}
