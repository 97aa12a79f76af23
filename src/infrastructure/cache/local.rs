//! Process-local cache tier.

use dashmap::DashMap;
use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

use super::error::{CacheError, CacheResult};

/// Largest value accepted by the local tier, in bytes.
pub const MAX_LOCAL_VALUE_BYTES: usize = 64 * 1024;

/// A cached payload or a confirmed-absent marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cached {
    Value(String),
    Empty,
}

#[derive(Debug, Clone)]
struct LocalEntry {
    cached: Cached,
    expires_at: Instant,
}

/// Bounded in-memory map with per-entry expiry.
///
/// When full, expired entries are purged first; if none are expired the
/// entry closest to expiry is evicted.
#[derive(Debug)]
pub struct LocalCache {
    entries: DashMap<String, LocalEntry>,
    max_entries: usize,
}

/// Extends `ttl` by a random amount of up to `percent` percent of itself.
pub fn jittered(ttl: Duration, percent: u8) -> Duration {
    let spread = ttl.as_millis() as u64 * u64::from(percent.min(100)) / 100;
    if spread == 0 {
        return ttl;
    }
    ttl + Duration::from_millis(rand::rng().random_range(0..=spread))
}

impl LocalCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    pub fn get(&self, key: &str) -> Option<Cached> {
        let now = Instant::now();
        let cached = {
            let entry = self.entries.get(key)?;
            (entry.expires_at > now).then(|| entry.cached.clone())
        };

        if cached.is_none() {
            self.entries.remove_if(key, |_, e| e.expires_at <= now);
        }
        cached
    }

    pub fn insert(&self, key: &str, cached: Cached, ttl: Duration) -> CacheResult<()> {
        if let Cached::Value(value) = &cached
            && value.len() > MAX_LOCAL_VALUE_BYTES
        {
            return Err(CacheError::LocalRejected {
                key: key.to_string(),
                reason: format!("value of {} bytes exceeds local limit", value.len()),
            });
        }

        if !self.entries.contains_key(key) && self.entries.len() >= self.max_entries {
            self.make_room();
        }

        self.entries.insert(
            key.to_string(),
            LocalEntry {
                cached,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn make_room(&self) {
        let now = Instant::now();
        self.entries.retain(|_, e| e.expires_at > now);

        if self.entries.len() < self.max_entries {
            return;
        }

        let victim = self
            .entries
            .iter()
            .min_by_key(|e| e.expires_at)
            .map(|e| e.key().clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
        }
    }
}
