//! Short-lived link tokens.
//!
//! Operators register a meeting URL and get back an opaque token that can
//! later be dispatched to an agent as an `open_url` command. Tokens expire
//! after a fixed TTL and are consumed on dispatch.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Maximum live entries before expired ones are purged on insert
const MAX_CACHE_SIZE: usize = 10_000;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

/// Concurrent map whose entries vanish after `ttl`
#[derive(Debug, Clone)]
pub struct TtlCache<V> {
    entries: Arc<DashMap<String, Entry<V>>>,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::seconds(600)),
        }
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl.num_seconds()
    }

    /// Store `value` under a fresh random token
    pub fn issue(&self, value: V) -> String {
        let token = Uuid::new_v4().simple().to_string()[..12].to_string();
        self.insert_at(token.clone(), value, Utc::now());
        token
    }

    pub fn insert_at(&self, key: String, value: V, now: DateTime<Utc>) {
        if self.entries.len() >= MAX_CACHE_SIZE {
            self.purge_expired(now);
        }
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: now + self.ttl,
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Utc::now())
    }

    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<V> {
        let entry = self.entries.get(key)?;
        (entry.expires_at > now).then(|| entry.value.clone())
    }

    /// Remove and return a live entry
    pub fn take(&self, key: &str) -> Option<V> {
        self.take_at(key, Utc::now())
    }

    pub fn take_at(&self, key: &str, now: DateTime<Utc>) -> Option<V> {
        let (_, entry) = self.entries.remove(key)?;
        (entry.expires_at > now).then_some(entry.value)
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issued_token_resolves_until_expiry() {
        let cache = TtlCache::new(std::time::Duration::from_secs(60));
        let token = cache.issue("https://meet.example/1".to_string());
        assert_eq!(token.len(), 12);
        assert_eq!(cache.get(&token).as_deref(), Some("https://meet.example/1"));

        let later = Utc::now() + Duration::seconds(61);
        assert_eq!(cache.get_at(&token, later), None);
        assert_eq!(cache.purge_expired(later), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_take_consumes_entry() {
        let cache = TtlCache::new(std::time::Duration::from_secs(60));
        let now = Utc::now();
        cache.insert_at("abc".to_string(), 7u32, now);

        assert_eq!(cache.take_at("abc", now), Some(7));
        assert_eq!(cache.take_at("abc", now), None);
    }

    #[test]
    fn test_expired_entry_is_not_taken() {
        let cache = TtlCache::new(std::time::Duration::from_secs(1));
        let now = Utc::now();
        cache.insert_at("abc".to_string(), 1u8, now);
        assert_eq!(cache.take_at("abc", now + Duration::seconds(2)), None);
        assert_eq!(cache.len(), 0);
    }
}
