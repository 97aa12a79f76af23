//! In-process [`RemoteStore`] for single-node deployments and tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::bloom_bits::BloomBits;
use super::store::{Claim, PipelineOp, RemoteStore, StoreError, StoreResult};

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Bloom(BloomBits),
    Cardinality(HashSet<String>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Text(_) => "string",
            Value::Bloom(_) => "bloom",
            Value::Cardinality(_) => "hyperloglog",
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Key/value store held in process memory.
///
/// Mirrors the Redis semantics the rest of the crate relies on: expiring
/// keys, atomic conditional writes, implicit bloom creation on add and
/// "absent" answers for missing filters. The cardinality estimator is exact.
/// Every operation runs inside one critical section, which is what makes the
/// conditional operations atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    writes: AtomicU64,
}

/// Writes between two sweeps of expired keys.
const SWEEP_EVERY: u64 = 1024;

fn purge_expired(entries: &mut HashMap<String, Entry>, key: &str, now: Instant) {
    if entries.get(key).is_some_and(|e| !e.is_live(now)) {
        entries.remove(key);
    }
}

fn wrong_type(command: &'static str, found: &Value) -> StoreError {
    StoreError::command(
        command,
        format!("WRONGTYPE key holds a {} value", found.kind()),
    )
}

impl MemoryStore {
    pub fn new() -> Self {
        debug!("Using in-memory store");
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `f` over the live entry for `key` (expired entries are purged first).
    fn with_live<R>(&self, key: &str, f: impl FnOnce(&mut HashMap<String, Entry>) -> R) -> R {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        purge_expired(&mut entries, key, now);
        f(&mut entries)
    }

    /// Drops every expired key once per [`SWEEP_EVERY`] writes.
    ///
    /// Reads purge the key they touch, so this only bounds memory held by
    /// keys nobody reads again.
    fn sweep_if_due(&self, entries: &mut HashMap<String, Entry>, now: Instant) {
        if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            entries.retain(|_, entry| entry.is_live(now));
        }
    }

    /// Number of stored keys, expired or not.
    #[cfg(test)]
    fn stored(&self) -> usize {
        self.entries.lock().len()
    }

    fn text(&self, command: &'static str, key: &str) -> StoreResult<Option<String>> {
        self.with_live(key, |entries| match entries.get(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Text(text),
                ..
            }) => Ok(Some(text.clone())),
            Some(other) => Err(wrong_type(command, &other.value)),
        })
    }

    fn incr_locked(entries: &mut HashMap<String, Entry>, key: &str) -> StoreResult<i64> {
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Text("0".to_string()), None));

        match &mut entry.value {
            Value::Text(text) => {
                let current: i64 = text
                    .parse()
                    .map_err(|_| StoreError::command("INCR", "value is not an integer"))?;
                let next = current + 1;
                *text = next.to_string();
                Ok(next)
            }
            other => Err(wrong_type("INCR", other)),
        }
    }

    fn pfadd_locked(
        entries: &mut HashMap<String, Entry>,
        key: &str,
        member: &str,
    ) -> StoreResult<bool> {
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Cardinality(HashSet::new()), None));

        match &mut entry.value {
            Value::Cardinality(members) => Ok(members.insert(member.to_string())),
            other => Err(wrong_type("PFADD", other)),
        }
    }

    fn bloom_mut<'a>(
        entries: &'a mut HashMap<String, Entry>,
        command: &'static str,
        name: &str,
    ) -> StoreResult<&'a mut BloomBits> {
        let entry = entries
            .entry(name.to_string())
            .or_insert_with(|| Entry::new(Value::Bloom(BloomBits::with_defaults()), None));

        match &mut entry.value {
            Value::Bloom(bits) => Ok(bits),
            other => Err(wrong_type(command, other)),
        }
    }

    fn bloom_contains(&self, command: &'static str, name: &str, items: &[String]) -> StoreResult<Vec<bool>> {
        self.with_live(name, |entries| match entries.get(name) {
            None => Ok(vec![false; items.len()]),
            Some(Entry {
                value: Value::Bloom(bits),
                ..
            }) => Ok(items.iter().map(|item| bits.contains(item)).collect()),
            Some(other) => Err(wrong_type(command, &other.value)),
        })
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.text("GET", key)
    }

    async fn get_with_ttl(&self, key: &str) -> StoreResult<Option<(String, Option<Duration>)>> {
        self.with_live(key, |entries| match entries.get(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Text(text),
                expires_at,
            }) => {
                let now = Instant::now();
                let ttl = expires_at.map(|at| at.saturating_duration_since(now));
                Ok(Some((text.clone(), ttl)))
            }
            Some(other) => Err(wrong_type("GET", &other.value)),
        })
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut entries = self.entries.lock();
        self.sweep_if_due(&mut entries, Instant::now());
        entries.insert(
            key.to_string(),
            Entry::new(Value::Text(value.to_string()), ttl),
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<Claim> {
        self.with_live(key, |entries| match entries.get(key) {
            Some(Entry {
                value: Value::Text(holder),
                ..
            }) => Ok(Claim::Held(holder.clone())),
            Some(other) => Err(wrong_type("SET", &other.value)),
            None => {
                entries.insert(
                    key.to_string(),
                    Entry::new(Value::Text(value.to_string()), ttl),
                );
                Ok(Claim::Acquired)
            }
        })
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        self.with_live(key, |entries| Ok(entries.remove(key).is_some()))
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.with_live(key, |entries| Ok(entries.contains_key(key)))
    }

    async fn expire_if_eq(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        self.with_live(key, |entries| match entries.get_mut(key) {
            Some(entry) if matches!(&entry.value, Value::Text(v) if v == value) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        })
    }

    async fn del_if_eq(&self, key: &str, value: &str) -> StoreResult<bool> {
        self.with_live(key, |entries| {
            let matches = entries
                .get(key)
                .is_some_and(|entry| matches!(&entry.value, Value::Text(v) if v == value));
            if matches {
                entries.remove(key);
            }
            Ok(matches)
        })
    }

    async fn rename(&self, from: &str, to: &str) -> StoreResult<()> {
        self.with_live(from, |entries| {
            let entry = entries
                .remove(from)
                .ok_or_else(|| StoreError::command("RENAME", "no such key"))?;
            entries.insert(to.to_string(), entry);
            Ok(())
        })
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        self.with_live(key, |entries| Self::incr_locked(entries, key))
    }

    async fn pfadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.with_live(key, |entries| Self::pfadd_locked(entries, key, member))
    }

    async fn pfcount(&self, key: &str) -> StoreResult<u64> {
        self.with_live(key, |entries| match entries.get(key) {
            None => Ok(0),
            Some(Entry {
                value: Value::Cardinality(members),
                ..
            }) => Ok(members.len() as u64),
            Some(other) => Err(wrong_type("PFCOUNT", &other.value)),
        })
    }

    async fn pipeline(&self, ops: Vec<PipelineOp>) -> StoreResult<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        self.sweep_if_due(&mut entries, now);

        for op in ops {
            match op {
                PipelineOp::Incr(key) => {
                    purge_expired(&mut entries, &key, now);
                    Self::incr_locked(&mut entries, &key)?;
                }
                PipelineOp::PfAdd(key, member) => {
                    purge_expired(&mut entries, &key, now);
                    Self::pfadd_locked(&mut entries, &key, &member)?;
                }
                PipelineOp::Expire(key, ttl) => {
                    purge_expired(&mut entries, &key, now);
                    if let Some(entry) = entries.get_mut(&key) {
                        entry.expires_at = Some(now + ttl);
                    }
                }
            }
        }

        Ok(())
    }

    async fn bf_reserve(&self, name: &str, error_rate: f64, capacity: u64) -> StoreResult<()> {
        self.with_live(name, |entries| {
            if entries.contains_key(name) {
                return Err(StoreError::command("BF.RESERVE", "item exists"));
            }
            entries.insert(
                name.to_string(),
                Entry::new(Value::Bloom(BloomBits::new(error_rate, capacity)), None),
            );
            Ok(())
        })
    }

    async fn bf_add(&self, name: &str, item: &str) -> StoreResult<bool> {
        self.with_live(name, |entries| {
            Ok(Self::bloom_mut(entries, "BF.ADD", name)?.insert(item))
        })
    }

    async fn bf_add_existing(&self, name: &str, item: &str) -> StoreResult<Option<bool>> {
        self.with_live(name, |entries| {
            if !entries.contains_key(name) {
                return Ok(None);
            }
            Ok(Some(Self::bloom_mut(entries, "BF.ADD", name)?.insert(item)))
        })
    }

    async fn bf_madd(&self, name: &str, items: &[String]) -> StoreResult<Vec<bool>> {
        self.with_live(name, |entries| {
            let bits = Self::bloom_mut(entries, "BF.MADD", name)?;
            Ok(items.iter().map(|item| bits.insert(item)).collect())
        })
    }

    async fn bf_exists(&self, name: &str, item: &str) -> StoreResult<bool> {
        let found = self.bloom_contains("BF.EXISTS", name, std::slice::from_ref(&item.to_string()))?;
        Ok(found.first().copied().unwrap_or(false))
    }

    async fn bf_mexists(&self, name: &str, items: &[String]) -> StoreResult<Vec<bool>> {
        self.bloom_contains("BF.MEXISTS", name, items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_set_with_ttl_expires() {
        let store = MemoryStore::new();
        store
            .set("k", "v", Some(Duration::from_secs(10)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_nx_reports_holder() {
        let store = MemoryStore::new();

        assert_eq!(store.set_nx("lock", "a", None).await.unwrap(), Claim::Acquired);
        assert_eq!(
            store.set_nx("lock", "b", None).await.unwrap(),
            Claim::Held("a".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_nx_succeeds_after_expiry() {
        let store = MemoryStore::new();
        let ttl = Some(Duration::from_millis(100));

        assert!(store.set_nx("lock", "a", ttl).await.unwrap().is_acquired());
        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(store.set_nx("lock", "b", ttl).await.unwrap().is_acquired());
    }

    #[tokio::test]
    async fn test_conditional_operations_check_value() {
        let store = MemoryStore::new();
        store.set("lock", "owner", None).await.unwrap();

        assert!(!store.del_if_eq("lock", "intruder").await.unwrap());
        assert!(
            !store
                .expire_if_eq("lock", "intruder", Duration::from_secs(1))
                .await
                .unwrap()
        );
        assert!(
            store
                .expire_if_eq("lock", "owner", Duration::from_secs(1))
                .await
                .unwrap()
        );
        assert!(store.del_if_eq("lock", "owner").await.unwrap());
        assert!(!store.exists("lock").await.unwrap());
    }

    #[tokio::test]
    async fn test_rename_replaces_target() {
        let store = MemoryStore::new();
        store.bf_add("shadow", "abc").await.unwrap();
        store.bf_add("live", "old").await.unwrap();

        store.rename("shadow", "live").await.unwrap();

        assert!(!store.exists("shadow").await.unwrap());
        assert!(store.bf_exists("live", "abc").await.unwrap());
        assert!(!store.bf_exists("live", "old").await.unwrap());
        assert!(store.rename("missing", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_bloom_reserve_and_membership() {
        let store = MemoryStore::new();
        store.bf_reserve("links", 0.001, 1_000).await.unwrap();
        assert!(store.bf_reserve("links", 0.001, 1_000).await.is_err());

        let added = store
            .bf_madd("links", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(added, vec![true, true]);

        let found = store
            .bf_mexists("links", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(found, vec![true, true]);
    }

    #[tokio::test]
    async fn test_missing_filter_reports_absent() {
        let store = MemoryStore::new();
        assert!(!store.bf_exists("nope", "a").await.unwrap());
        assert_eq!(
            store.bf_mexists("nope", &["a".to_string()]).await.unwrap(),
            vec![false]
        );
    }

    #[tokio::test]
    async fn test_wrong_type_is_rejected() {
        let store = MemoryStore::new();
        store.set("text", "1", None).await.unwrap();
        assert!(store.bf_add("text", "a").await.is_err());
        assert!(store.pfadd("text", "a").await.is_err());
    }

    #[tokio::test]
    async fn test_pipeline_counts() {
        let store = MemoryStore::new();
        store
            .pipeline(vec![
                PipelineOp::Incr("pv".to_string()),
                PipelineOp::Incr("pv".to_string()),
                PipelineOp::PfAdd("uv".to_string(), "a".to_string()),
                PipelineOp::PfAdd("uv".to_string(), "a".to_string()),
                PipelineOp::PfAdd("uv".to_string(), "b".to_string()),
            ])
            .await
            .unwrap();

        assert_eq!(store.get("pv").await.unwrap().as_deref(), Some("2"));
        assert_eq!(store.pfcount("uv").await.unwrap(), 2);
        assert_eq!(store.incr("pv").await.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pipeline_restarts_expired_counters() {
        let store = MemoryStore::new();
        store
            .pipeline(vec![
                PipelineOp::Incr("pv".to_string()),
                PipelineOp::Expire("pv".to_string(), Duration::from_secs(1)),
            ])
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        store
            .pipeline(vec![PipelineOp::Incr("pv".to_string())])
            .await
            .unwrap();

        assert_eq!(store.get("pv").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_keys_are_swept_periodically() {
        let store = MemoryStore::new();
        for i in 0..10 {
            store
                .set(&format!("k{i}"), "v", Some(Duration::from_secs(1)))
                .await
                .unwrap();
        }
        tokio::time::advance(Duration::from_secs(2)).await;

        // One write does not scan the whole map.
        store
            .pipeline(vec![PipelineOp::Incr("pv".to_string())])
            .await
            .unwrap();
        assert_eq!(store.stored(), 11);

        for _ in 0..SWEEP_EVERY {
            store
                .pipeline(vec![PipelineOp::Incr("pv".to_string())])
                .await
                .unwrap();
        }
        assert_eq!(store.stored(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_with_ttl_reports_remaining_time() {
        let store = MemoryStore::new();
        store
            .set("k", "v", Some(Duration::from_secs(10)))
            .await
            .unwrap();
        store.set("forever", "v", None).await.unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(
            store.get_with_ttl("k").await.unwrap(),
            Some(("v".to_string(), Some(Duration::from_secs(6))))
        );
        assert_eq!(
            store.get_with_ttl("forever").await.unwrap(),
            Some(("v".to_string(), None))
        );
        assert_eq!(store.get_with_ttl("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_bf_add_existing_never_creates() {
        let store = MemoryStore::new();
        assert_eq!(store.bf_add_existing("shadow", "a").await.unwrap(), None);
        assert!(!store.exists("shadow").await.unwrap());

        store.bf_reserve("shadow", 0.01, 100).await.unwrap();
        assert_eq!(store.bf_add_existing("shadow", "a").await.unwrap(), Some(true));
        assert_eq!(store.bf_add_existing("shadow", "a").await.unwrap(), Some(false));
    }
}
