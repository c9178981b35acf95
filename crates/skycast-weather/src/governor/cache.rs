//! In-memory response cache keyed by endpoint and serialized parameters.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

/// A cached upstream response.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub data: Value,
    pub timestamp: Duration,
}

/// Build the cache key `endpoint:json(params)`.
///
/// # Errors
/// Returns an error if `params` cannot be serialized to JSON.
pub fn cache_key<P: Serialize + ?Sized>(endpoint: &str, params: &P) -> Result<String, serde_json::Error> {
    Ok(format!("{}:{}", endpoint, serde_json::to_string(params)?))
}

/// Time-bounded response cache.
///
/// Expired entries are not served but stay in the map until they are
/// overwritten or [`ResponseCache::purge_expired`] runs.
#[derive(Debug)]
pub struct ResponseCache {
    entries: HashMap<String, CacheEntry>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Return the entry's data if it is still live at `now`.
    pub fn get(&self, key: &str, now: Duration) -> Option<&Value> {
        self.entries
            .get(key)
            .filter(|entry| self.is_live(entry, now))
            .map(|entry| &entry.data)
    }

    pub fn insert(&mut self, key: String, data: Value, now: Duration) {
        self.entries.insert(
            key,
            CacheEntry {
                data,
                timestamp: now,
            },
        );
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&mut self, now: Duration) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| now.saturating_sub(entry.timestamp) < ttl);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_live(&self, entry: &CacheEntry, now: Duration) -> bool {
        now.saturating_sub(entry.timestamp) < self.ttl
    }
}
