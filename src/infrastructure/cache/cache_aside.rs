//! Two-tier cache-aside store.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::error::{CacheError, CacheResult};
use super::local::{Cached, LocalCache, jittered};
use super::singleflight::SingleFlight;
use crate::error::AppError;
use crate::infrastructure::kv::{RemoteStore, StoreError};

/// Outcome of a cache read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(String),
    /// The key is cached as confirmed absent.
    Empty,
    Miss,
}

/// Persisted representation of a remote cache record.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Envelope {
    Value { data: String },
    Empty,
}

impl From<Cached> for Envelope {
    fn from(cached: Cached) -> Self {
        match cached {
            Cached::Value(data) => Envelope::Value { data },
            Cached::Empty => Envelope::Empty,
        }
    }
}

impl From<Envelope> for Cached {
    fn from(envelope: Envelope) -> Self {
        match envelope {
            Envelope::Value { data } => Cached::Value(data),
            Envelope::Empty => Cached::Empty,
        }
    }
}

impl From<Cached> for CacheLookup {
    fn from(cached: Cached) -> Self {
        match cached {
            Cached::Value(value) => CacheLookup::Hit(value),
            Cached::Empty => CacheLookup::Empty,
        }
    }
}

/// Local tier tuning.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Upper bound for how long an entry lives in the local tier.
    pub local_ttl: Duration,
    pub local_max_entries: usize,
    /// Random extension applied to local TTLs, as a percentage of the TTL.
    pub jitter_percent: u8,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            local_ttl: Duration::from_secs(30),
            local_max_entries: 10_000,
            jitter_percent: 10,
        }
    }
}

type LoadResult = Result<Option<String>, AppError>;

/// Read-through cache with a process-local tier in front of a shared remote tier.
///
/// Misses are refilled by exactly one loader per key per process. Confirmed
/// absence is cached as an empty marker so repeated lookups of missing keys
/// never reach the origin.
pub struct CacheAsideStore {
    remote: Arc<dyn RemoteStore>,
    local: LocalCache,
    settings: CacheSettings,
    loads: SingleFlight<LoadResult>,
    deletes: SingleFlight<CacheResult<()>>,
}

impl CacheAsideStore {
    pub fn new(remote: Arc<dyn RemoteStore>, settings: CacheSettings) -> Self {
        Self {
            remote,
            local: LocalCache::new(settings.local_max_entries),
            settings,
            loads: SingleFlight::new(),
            deletes: SingleFlight::new(),
        }
    }

    fn local_ttl(&self, ttl: Duration) -> Duration {
        jittered(ttl.min(self.settings.local_ttl), self.settings.jitter_percent)
    }

    fn store_local(&self, key: &str, cached: Cached, ttl: Duration) {
        if let Err(e) = self.local.insert(key, cached, self.local_ttl(ttl)) {
            warn!(key, error = %e, "Local cache write failed");
        }
    }

    /// Looks up `key` in the local tier, then the remote tier.
    ///
    /// A remote hit is copied into the local tier for no longer than the
    /// remote record has left to live.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::CacheGetFailed`] when the remote tier is unreachable.
    pub async fn get(&self, key: &str) -> CacheResult<CacheLookup> {
        if let Some(cached) = self.local.get(key) {
            debug!("Cache HIT (local): {}", key);
            metrics::counter!("cache_hits_total", "tier" => "local").increment(1);
            return Ok(cached.into());
        }

        let raw = self
            .remote
            .get_with_ttl(key)
            .await
            .map_err(|source| CacheError::CacheGetFailed {
                key: key.to_string(),
                source,
            })?;

        let Some((raw, remaining)) = raw else {
            debug!("Cache MISS: {}", key);
            metrics::counter!("cache_misses_total").increment(1);
            return Ok(CacheLookup::Miss);
        };

        match serde_json::from_str::<Envelope>(&raw) {
            Ok(envelope) => {
                debug!("Cache HIT (remote): {}", key);
                metrics::counter!("cache_hits_total", "tier" => "remote").increment(1);
                let cached = Cached::from(envelope);
                let ttl = remaining.unwrap_or(self.settings.local_ttl);
                self.store_local(key, cached.clone(), ttl);
                Ok(cached.into())
            }
            Err(e) => {
                warn!(key, error = %e, "Discarding malformed cache record");
                Ok(CacheLookup::Miss)
            }
        }
    }

    /// Caches `value` in both tiers; the remote copy expires after `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::CacheSetFailed`] if the remote write fails.
    pub async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.write(key, Cached::Value(value.to_string()), ttl).await
    }

    /// Caches `key` as confirmed absent.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::CacheSetFailed`] if the remote write fails.
    pub async fn set_empty(&self, key: &str, ttl: Duration) -> CacheResult<()> {
        self.write(key, Cached::Empty, ttl).await
    }

    async fn write(&self, key: &str, cached: Cached, ttl: Duration) -> CacheResult<()> {
        let payload = serde_json::to_string(&Envelope::from(cached.clone())).map_err(|e| {
            CacheError::CacheSetFailed {
                key: key.to_string(),
                source: StoreError::command("SET", e),
            }
        })?;

        self.store_local(key, cached, ttl);

        self.remote
            .set(key, &payload, Some(ttl))
            .await
            .map_err(|source| CacheError::CacheSetFailed {
                key: key.to_string(),
                source,
            })?;

        debug!("Cache SET: {} (TTL: {}s)", key, ttl.as_secs());
        Ok(())
    }

    /// Invalidates `key` in both tiers.
    ///
    /// Concurrent deletes of one key collapse into a single remote delete; when
    /// they do, the leader issues a second delete to catch a refill that raced
    /// the first.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::CacheDelFailed`] if the remote delete fails.
    pub async fn delete(&self, key: &str) -> CacheResult<()> {
        let flight = self
            .deletes
            .work(key, || async {
                self.local.remove(key);
                self.remote
                    .del(key)
                    .await
                    .map(|_| ())
                    .map_err(|source| CacheError::CacheDelFailed {
                        key: key.to_string(),
                        source,
                    })
            })
            .await;

        let mut result = flight.value;
        if result.is_ok() && flight.leader && flight.shared {
            result = self
                .remote
                .del(key)
                .await
                .map(|_| ())
                .map_err(|source| CacheError::CacheDelFailed {
                    key: key.to_string(),
                    source,
                });
        }

        self.local.remove(key);
        if result.is_ok() {
            debug!("Cache INVALIDATE: {}", key);
        }
        result
    }

    /// Cache-aside read: serves from cache or runs `loader` once per key.
    ///
    /// `loader` returns `Ok(None)` for a confirmed-absent key, which is cached
    /// with `empty_ttl`. A failing cache is logged and bypassed; loader errors
    /// are returned to every waiter and are not cached.
    pub async fn get_or_load<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        empty_ttl: Duration,
        loader: F,
    ) -> LoadResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = LoadResult>,
    {
        match self.get(key).await {
            Ok(CacheLookup::Hit(value)) => return Ok(Some(value)),
            Ok(CacheLookup::Empty) => return Ok(None),
            Ok(CacheLookup::Miss) => {}
            Err(e) => warn!(error = %e, "Cache unavailable, reading from origin"),
        }

        let flight = self
            .loads
            .work(key, || async {
                let loaded = loader().await;
                let stored = match &loaded {
                    Ok(Some(value)) => self.set(key, value, ttl).await,
                    Ok(None) => self.set_empty(key, empty_ttl).await,
                    Err(_) => Ok(()),
                };
                if let Err(e) = stored {
                    warn!(error = %e, "Failed to populate cache");
                }
                loaded
            })
            .await;

        flight.value
    }
}
