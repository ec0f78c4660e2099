use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::SqliteStore;
use crate::api::auth::token_fingerprint;
use crate::api::links::TtlCache;
use crate::config::AppConfig;
use crate::dispatch::{AgentRegistry, CommandQueue, DispatchService, TimeoutSweeper};
use crate::sync::{MeetingSource, MeetingStore, Reconciler};

/// Shared application state for API handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub store: SqliteStore,

    /// Register/poll/report protocol
    pub dispatch: DispatchService,

    /// Timeout sweeper, shared with its background task for the lifetime total
    pub sweeper: TimeoutSweeper,

    /// Meeting cache reconciliation
    pub reconciler: Arc<Reconciler>,

    /// Link token -> meeting URL
    pub links: TtlCache<String>,

    /// SHA-256 of the configured admin token
    pub admin_fingerprint: Option<Arc<str>>,

    /// Application start time
    pub start_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(store: SqliteStore, config: &AppConfig, source: Arc<dyn MeetingSource>) -> Self {
        let registry = AgentRegistry::new(store.clone());
        let queue = CommandQueue::new(store.clone());
        let sweeper = TimeoutSweeper::new(queue.clone(), &config.dispatch);
        let dispatch = DispatchService::new(registry, queue, config.dispatch.clone());
        let reconciler = Arc::new(Reconciler::new(
            source,
            MeetingStore::new(store.clone()),
            config.sync.clone(),
        ));

        let admin_fingerprint = config
            .server
            .admin_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| Arc::from(token_fingerprint(t)));

        Self {
            store,
            dispatch,
            sweeper,
            reconciler,
            links: TtlCache::new(Duration::from_secs(config.links.ttl_secs)),
            admin_fingerprint,
            start_time: Utc::now(),
        }
    }

    /// Get system uptime in seconds
    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.start_time).num_seconds()
    }
}
