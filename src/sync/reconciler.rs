//! Meeting cache reconciliation
//!
//! Periodically brings the local meeting cache in line with the upstream
//! scheduling service:
//! - insert meetings that appeared upstream
//! - overwrite meetings whose topic, start or link changed
//! - mark meetings that vanished upstream as deleted
//! - expire meetings whose start time has passed

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Offset, Utc};
use rand::Rng;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{ExpiryScanner, MeetingSource, MeetingStore, SnapshotRecord};
use crate::config::SyncConfig;
use crate::domain::{Meeting, MeetingStatus, SyncStats, UpstreamMeeting, SYNC_PRINCIPAL};
use crate::error::{RelayError, Result};

/// Outcome of the most recent pass
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub stats: SyncStats,
    pub consecutive_failures: u32,
}

/// Half-open fetch window [from, to)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl SyncWindow {
    /// Local midnight of `now` in the given offset, spanning `days` days
    pub fn starting_local_midnight(now: DateTime<Utc>, utc_offset_minutes: i32, days: i64) -> Self {
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix());
        let local_midnight = now
            .with_timezone(&offset)
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .and_then(|midnight| midnight.and_local_timezone(offset).single())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(now);

        Self {
            from: local_midnight,
            to: local_midnight + ChronoDuration::days(days),
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.from && ts < self.to
    }
}

pub struct Reconciler {
    source: Arc<dyn MeetingSource>,
    meetings: MeetingStore,
    expiry: ExpiryScanner,
    config: SyncConfig,
    /// Serializes passes so manual and scheduled runs never overlap
    pass_lock: Mutex<()>,
    wake: Notify,
    last: RwLock<Option<SyncReport>>,
}

impl Reconciler {
    pub fn new(source: Arc<dyn MeetingSource>, meetings: MeetingStore, config: SyncConfig) -> Self {
        Self {
            source,
            expiry: ExpiryScanner::new(meetings.clone()),
            meetings,
            config,
            pass_lock: Mutex::new(()),
            wake: Notify::new(),
            last: RwLock::new(None),
        }
    }

    pub fn expiry(&self) -> &ExpiryScanner {
        &self.expiry
    }

    pub fn meetings(&self) -> &MeetingStore {
        &self.meetings
    }

    pub async fn last_report(&self) -> Option<SyncReport> {
        self.last.read().await.clone()
    }

    /// Ask the scheduled loop to run a pass now
    pub fn trigger(&self) {
        self.wake.notify_one();
    }

    /// Run a pass immediately against the wall clock
    pub async fn sync_now(&self) -> SyncStats {
        self.reconcile_at(Utc::now()).await
    }

    /// Run a pass as of `now`. Upstream failures yield `errors = 1` and no changes.
    pub async fn reconcile_at(&self, now: DateTime<Utc>) -> SyncStats {
        match self.pass(now).await {
            Ok(stats) => stats,
            Err(_) => SyncStats {
                errors: 1,
                ..SyncStats::default()
            },
        }
    }

    /// Insert path for meetings scheduled directly by a user.
    ///
    /// The row is active immediately; the next pass treats it like any other
    /// upstream meeting.
    pub async fn record_local(&self, meeting: &UpstreamMeeting, created_by: &str) -> Result<i64> {
        if meeting.external_id.trim().is_empty() {
            return Err(RelayError::Validation("external_id is required".to_string()));
        }
        let id = self.meetings.upsert_active(meeting, created_by, Utc::now()).await?;
        info!(meeting_id = id, external_id = %meeting.external_id, created_by, "Recorded local meeting");
        Ok(id)
    }

    /// Run on startup, then on the configured interval, a manual trigger, or a
    /// backoff delay after a failure, until shutdown is signalled.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting reconciliation loop (interval: {}s, window: {} days)",
            self.config.interval_secs, self.config.window_days
        );

        let mut failures: u32 = 0;
        loop {
            failures = match self.pass(Utc::now()).await {
                Ok(_) => 0,
                Err(_) => failures.saturating_add(1),
            };

            let delay = if failures == 0 {
                Duration::from_secs(self.config.interval_secs)
            } else {
                retry_delay(&self.config, failures)
            };
            debug!(delay_secs = delay.as_secs(), failures, "Next reconciliation scheduled");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.wake.notified() => {
                    info!("Reconciliation woken by manual trigger");
                }
                _ = shutdown.changed() => {
                    info!("Reconciliation loop stopping");
                    return;
                }
            }
        }
    }

    async fn pass(&self, now: DateTime<Utc>) -> Result<SyncStats> {
        let _guard = self.pass_lock.lock().await;
        let started = Instant::now();

        let outcome = self.diff_and_apply(now).await;
        let (stats, failed) = match &outcome {
            Ok(stats) => {
                info!(%stats, "Reconciliation completed");
                (*stats, false)
            }
            Err(e) => {
                error!("Reconciliation aborted, upstream unavailable: {}", e);
                (
                    SyncStats {
                        errors: 1,
                        ..SyncStats::default()
                    },
                    true,
                )
            }
        };

        let mut last = self.last.write().await;
        let previous_failures = last.as_ref().map(|r| r.consecutive_failures).unwrap_or(0);
        *last = Some(SyncReport {
            finished_at: Utc::now(),
            duration_ms: started.elapsed().as_millis() as u64,
            stats,
            consecutive_failures: if failed { previous_failures + 1 } else { 0 },
        });

        outcome
    }

    async fn diff_and_apply(&self, now: DateTime<Utc>) -> Result<SyncStats> {
        let window = SyncWindow::starting_local_midnight(
            now,
            self.config.utc_offset_minutes,
            self.config.window_days,
        );
        let snapshot = self.source.fetch(window.from, window.to).await?;
        debug!(records = snapshot.len(), "Upstream snapshot fetched");

        let mut stats = SyncStats::default();

        let seen: HashSet<&str> = snapshot.iter().filter_map(SnapshotRecord::external_id).collect();

        // Vanished upstream
        for local in self.meetings.active().await? {
            if seen.contains(local.external_id.as_str()) {
                continue;
            }
            match self.meetings.mark_deleted_unless_touched(local.id, now, now).await {
                Ok(true) => {
                    info!(external_id = %local.external_id, "Meeting removed upstream");
                    stats.deleted += 1;
                }
                Ok(false) => {
                    debug!(external_id = %local.external_id, "Skipping meeting written during fetch");
                }
                Err(e) => {
                    warn!(external_id = %local.external_id, "Failed to mark meeting deleted: {}", e);
                    stats.errors += 1;
                }
            }
        }

        // Present upstream
        for record in &snapshot {
            let upstream = match record {
                SnapshotRecord::Valid(m) => m,
                SnapshotRecord::Malformed { external_id, reason } => {
                    warn!(external_id = ?external_id, reason = %reason, "Skipping malformed upstream meeting");
                    stats.errors += 1;
                    continue;
                }
            };

            if let Err(e) = self.apply_upstream(upstream, &window, now, &mut stats).await {
                warn!(external_id = %upstream.external_id, "Failed to apply upstream meeting: {}", e);
                stats.errors += 1;
            }
        }

        if self.config.expire_on_sync {
            stats.expired += self.expiry.expire_logged(now).await as u32;
        }

        Ok(stats)
    }

    async fn apply_upstream(
        &self,
        upstream: &UpstreamMeeting,
        window: &SyncWindow,
        now: DateTime<Utc>,
        stats: &mut SyncStats,
    ) -> Result<()> {
        let Some(local) = self.meetings.get_by_external_id(&upstream.external_id).await? else {
            self.meetings.insert(upstream, SYNC_PRINCIPAL, now).await?;
            debug!(external_id = %upstream.external_id, "Meeting added");
            stats.added += 1;
            return Ok(());
        };

        let Some(target) = target_status(&local, upstream, window, now) else {
            return Ok(());
        };

        if self
            .meetings
            .overwrite(local.id, local.status, upstream, target, now)
            .await?
        {
            debug!(
                external_id = %upstream.external_id,
                from = %local.status,
                to = %target,
                "Meeting updated"
            );
            stats.updated += 1;
        }
        Ok(())
    }
}

/// Status an existing local meeting should move to, or None when it is current.
fn target_status(
    local: &Meeting,
    upstream: &UpstreamMeeting,
    window: &SyncWindow,
    now: DateTime<Utc>,
) -> Option<MeetingStatus> {
    match local.status {
        MeetingStatus::Active => local.differs_from(upstream).then_some(MeetingStatus::Active),
        _ if upstream.start_time >= now && window.contains(upstream.start_time) => {
            Some(MeetingStatus::Active)
        }
        // still scheduled upstream, just already started
        MeetingStatus::Deleted if upstream.start_time < now => Some(MeetingStatus::Expired),
        _ => None,
    }
}

/// Exponential backoff with up to 20% jitter, capped at the regular interval
fn retry_delay(config: &SyncConfig, failures: u32) -> Duration {
    let exp = failures.saturating_sub(1).min(16);
    let base = config
        .retry_base_secs
        .saturating_mul(2u64.saturating_pow(exp))
        .min(config.interval_secs)
        .max(1);
    let jitter = rand::thread_rng().gen_range(0..=base / 5);
    Duration::from_secs(base + jitter)
}
