//! Background job failing commands whose agent never reported back.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info, warn};

use super::CommandQueue;
use crate::config::DispatchConfig;

#[derive(Clone)]
pub struct TimeoutSweeper {
    queue: CommandQueue,
    period: Duration,
    threshold: ChronoDuration,
    total_failed: Arc<AtomicU64>,
}

impl TimeoutSweeper {
    pub fn new(queue: CommandQueue, config: &DispatchConfig) -> Self {
        Self {
            queue,
            period: Duration::from_secs(config.sweep_interval_secs),
            threshold: ChronoDuration::seconds(config.command_timeout_secs as i64),
            total_failed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Commands force-failed since startup
    pub fn total_failed(&self) -> u64 {
        self.total_failed.load(Ordering::Relaxed)
    }

    /// One sweep as of `now`. Errors are logged and reported as zero.
    pub async fn run_once(&self, now: DateTime<Utc>) -> u64 {
        match self.queue.sweep_timed_out(now - self.threshold, now).await {
            Ok(0) => 0,
            Ok(count) => {
                self.total_failed.fetch_add(count, Ordering::Relaxed);
                warn!(count, "Timed out running commands");
                count
            }
            Err(e) => {
                error!("Timeout sweep failed: {}", e);
                0
            }
        }
    }

    /// Sweep on a fixed period until shutdown is signalled
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.period);

        info!(
            "Starting timeout sweeper (interval: {}s, threshold: {}s)",
            self.period.as_secs(),
            self.threshold.num_seconds()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once(Utc::now()).await;
                }
                _ = shutdown.changed() => {
                    info!("Timeout sweeper stopping");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SqliteStore;
    use crate::dispatch::AgentRegistry;
    use crate::domain::{Action, AgentCandidate, CommandStatus};
    use serde_json::json;

    #[tokio::test]
    async fn test_run_once_counts_and_accumulates() {
        let store = SqliteStore::in_memory().await.unwrap();
        let agent = AgentRegistry::new(store.clone())
            .register(
                &AgentCandidate {
                    base_url: "http://h:1".to_string(),
                    os_type: "linux".to_string(),
                    client_version: "1".to_string(),
                    ..Default::default()
                },
                Utc::now(),
            )
            .await
            .unwrap();
        let queue = CommandQueue::new(store);
        let sweeper = TimeoutSweeper::new(queue.clone(), &DispatchConfig::default());

        let start = Utc::now();
        let id = queue.enqueue(agent, Action::OpenUrl, &json!({}), start).await.unwrap();
        queue.reserve_pending(agent, start).await.unwrap();

        assert_eq!(sweeper.run_once(start + ChronoDuration::seconds(60)).await, 0);
        assert_eq!(sweeper.run_once(start + ChronoDuration::seconds(121)).await, 1);
        assert_eq!(sweeper.run_once(start + ChronoDuration::seconds(500)).await, 0);
        assert_eq!(sweeper.total_failed(), 1);
        assert_eq!(queue.get(id).await.unwrap().status, CommandStatus::Failed);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = SqliteStore::in_memory().await.unwrap();
        let sweeper = TimeoutSweeper::new(CommandQueue::new(store), &DispatchConfig::default());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(sweeper.run(rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
