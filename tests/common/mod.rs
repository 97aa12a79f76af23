#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::ConnectInfo;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use shortlink_core::application::ingest::CounterStore;
use shortlink_core::application::services::{CachePolicy, LinkService, StatsService};
use shortlink_core::domain::entities::{Link, LinkPatch, NewAccessRecord, NewLink};
use shortlink_core::domain::repositories::{AccessRepository, BatchWriteError, LinkRepository};
use shortlink_core::domain::sharding::ShardRouter;
use shortlink_core::error::AppError;
use shortlink_core::infrastructure::bloom::{BloomGate, BloomSettings};
use shortlink_core::infrastructure::cache::{CacheAsideStore, CacheSettings};
use shortlink_core::infrastructure::kv::{
    Claim, MemoryStore, PipelineOp, RemoteStore, StoreError, StoreResult,
};
use shortlink_core::infrastructure::lock::DistributedMutex;
use shortlink_core::infrastructure::transport::MemoryTransport;
use shortlink_core::state::AppState;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tower::Layer;

pub const BASE_URL: &str = "https://s.example.com";
pub const SHARDS: u32 = 4;

/// Sharded link storage held in memory, with the same visibility rules as
/// the PostgreSQL repository: deleted links reserve their code but are
/// invisible to lookups.
pub struct MemoryLinkRepository {
    router: ShardRouter,
    shards: Mutex<Vec<Vec<Link>>>,
    lookups: AtomicUsize,
}

impl MemoryLinkRepository {
    pub fn new(shard_count: u32) -> Self {
        let router = ShardRouter::new(shard_count);
        Self {
            router,
            shards: Mutex::new(vec![Vec::new(); router.shard_count() as usize]),
            lookups: AtomicUsize::new(0),
        }
    }

    /// Number of `find_by_code` calls so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Inserts a row directly, bypassing services (no bloom or cache update).
    pub fn seed(&self, code: &str, long_url: &str) -> Link {
        let mut shards = self.shards.lock();
        let rows = &mut shards[self.router.index(code) as usize];
        let now = Utc::now();
        let link = Link::new(
            rows.len() as i64 + 1,
            code.to_string(),
            long_url.to_string(),
            now,
            now,
            None,
        );
        rows.push(link.clone());
        link
    }
}

#[async_trait]
impl LinkRepository for MemoryLinkRepository {
    fn shard_count(&self) -> u32 {
        self.router.shard_count()
    }

    async fn ensure_schema(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn insert(&self, new_link: NewLink) -> Result<Link, AppError> {
        let taken = {
            let shards = self.shards.lock();
            shards[self.router.index(&new_link.code) as usize]
                .iter()
                .any(|link| link.code == new_link.code)
        };
        if taken {
            return Err(AppError::conflict(
                "Already exists",
                json!({ "code": new_link.code }),
            ));
        }
        Ok(self.seed(&new_link.code, &new_link.long_url))
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Link>, AppError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let shards = self.shards.lock();
        Ok(shards[self.router.index(code) as usize]
            .iter()
            .find(|link| link.code == code && !link.is_deleted())
            .cloned())
    }

    async fn find_by_codes(&self, codes: &[String]) -> Result<Vec<Link>, AppError> {
        let wanted: HashSet<&String> = codes.iter().collect();
        let shards = self.shards.lock();
        Ok(shards
            .iter()
            .flatten()
            .filter(|link| wanted.contains(&link.code) && !link.is_deleted())
            .cloned()
            .collect())
    }

    async fn update_by_code(&self, code: &str, patch: LinkPatch) -> Result<Option<Link>, AppError> {
        let mut shards = self.shards.lock();
        let Some(link) = shards[self.router.index(code) as usize]
            .iter_mut()
            .find(|link| link.code == code && !link.is_deleted())
        else {
            return Ok(None);
        };

        let now = Utc::now();
        if let Some(long_url) = patch.long_url {
            link.long_url = long_url;
        }
        match patch.deleted {
            Some(true) => link.deleted_at = Some(now),
            Some(false) => link.deleted_at = None,
            None => {}
        }
        link.updated_at = now;
        Ok(Some(link.clone()))
    }

    async fn scan_codes(
        &self,
        shard: u32,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<(i64, String)>, AppError> {
        let shards = self.shards.lock();
        Ok(shards
            .get(shard as usize)
            .map(|rows| {
                rows.iter()
                    .filter(|link| link.id > after_id)
                    .take(limit as usize)
                    .map(|link| (link.id, link.code.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Access rows held in memory; duplicate message ids are skipped like the
/// unique index does in PostgreSQL.
#[derive(Default)]
pub struct MemoryAccessRepository {
    rows: Mutex<Vec<NewAccessRecord>>,
    batches: Mutex<Vec<usize>>,
}

impl MemoryAccessRepository {
    pub fn rows(&self) -> Vec<NewAccessRecord> {
        self.rows.lock().clone()
    }

    /// Size of every `insert_batch` call, in call order.
    pub fn batches(&self) -> Vec<usize> {
        self.batches.lock().clone()
    }
}

#[async_trait]
impl AccessRepository for MemoryAccessRepository {
    async fn ensure_schema(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn insert_batch(&self, records: &[NewAccessRecord]) -> Result<u64, BatchWriteError> {
        self.batches.lock().push(records.len());
        let mut rows = self.rows.lock();
        let mut inserted = 0;
        for record in records {
            if rows.iter().any(|row| row.message_id == record.message_id) {
                continue;
            }
            rows.push(record.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn count_by_code(&self, code: &str) -> Result<i64, AppError> {
        Ok(self.rows.lock().iter().filter(|row| row.code == code).count() as i64)
    }
}

/// Memory store with switchable faults, for exercising error and race paths.
#[derive(Default)]
pub struct InstrumentedStore {
    pub inner: MemoryStore,
    fail_renames: AtomicBool,
    renamed_from: Mutex<Option<String>>,
    hold_del: AtomicBool,
    pub del_applied: Notify,
    pub del_release: Notify,
}

impl InstrumentedStore {
    /// Makes every RENAME fail after recording its source key.
    pub fn fail_renames(&self) {
        self.fail_renames.store(true, Ordering::SeqCst);
    }

    pub fn renamed_from(&self) -> Option<String> {
        self.renamed_from.lock().clone()
    }

    /// The next DEL is applied, then its call stays pending until
    /// `del_release` is notified.
    pub fn hold_next_del(&self) {
        self.hold_del.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteStore for InstrumentedStore {
    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn get_with_ttl(&self, key: &str) -> StoreResult<Option<(String, Option<Duration>)>> {
        self.inner.get_with_ttl(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.inner.set(key, value, ttl).await
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<Claim> {
        self.inner.set_nx(key, value, ttl).await
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        let existed = self.inner.del(key).await?;
        if self.hold_del.swap(false, Ordering::SeqCst) {
            self.del_applied.notify_one();
            self.del_release.notified().await;
        }
        Ok(existed)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.inner.exists(key).await
    }

    async fn expire_if_eq(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        self.inner.expire_if_eq(key, value, ttl).await
    }

    async fn del_if_eq(&self, key: &str, value: &str) -> StoreResult<bool> {
        self.inner.del_if_eq(key, value).await
    }

    async fn rename(&self, from: &str, to: &str) -> StoreResult<()> {
        *self.renamed_from.lock() = Some(from.to_string());
        if self.fail_renames.load(Ordering::SeqCst) {
            return Err(StoreError::command("RENAME", "connection reset"));
        }
        self.inner.rename(from, to).await
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        self.inner.incr(key).await
    }

    async fn pfadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.inner.pfadd(key, member).await
    }

    async fn pfcount(&self, key: &str) -> StoreResult<u64> {
        self.inner.pfcount(key).await
    }

    async fn pipeline(&self, ops: Vec<PipelineOp>) -> StoreResult<()> {
        self.inner.pipeline(ops).await
    }

    async fn bf_reserve(&self, name: &str, error_rate: f64, capacity: u64) -> StoreResult<()> {
        self.inner.bf_reserve(name, error_rate, capacity).await
    }

    async fn bf_add(&self, name: &str, item: &str) -> StoreResult<bool> {
        self.inner.bf_add(name, item).await
    }

    async fn bf_add_existing(&self, name: &str, item: &str) -> StoreResult<Option<bool>> {
        self.inner.bf_add_existing(name, item).await
    }

    async fn bf_madd(&self, name: &str, items: &[String]) -> StoreResult<Vec<bool>> {
        self.inner.bf_madd(name, items).await
    }

    async fn bf_exists(&self, name: &str, item: &str) -> StoreResult<bool> {
        self.inner.bf_exists(name, item).await
    }

    async fn bf_mexists(&self, name: &str, items: &[String]) -> StoreResult<Vec<bool>> {
        self.inner.bf_mexists(name, items).await
    }
}

/// Every collaborator of a test [`AppState`], kept for assertions.
pub struct TestApp {
    pub state: AppState,
    pub links: Arc<MemoryLinkRepository>,
    pub access: Arc<MemoryAccessRepository>,
    pub store: Arc<MemoryStore>,
    pub transport: Arc<MemoryTransport>,
    pub cache: Arc<CacheAsideStore>,
    pub bloom: Arc<BloomGate>,
}

/// Builds a state on in-memory backends with an empty, provisioned bloom
/// filter.
pub async fn create_test_app() -> TestApp {
    let links = Arc::new(MemoryLinkRepository::new(SHARDS));
    let access = Arc::new(MemoryAccessRepository::default());
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(MemoryTransport::new());

    let bloom = Arc::new(BloomGate::new(
        store.clone(),
        DistributedMutex::new(store.clone()),
        BloomSettings::default(),
    ));
    bloom.ensure(links.clone()).await.unwrap();

    let cache = Arc::new(CacheAsideStore::new(
        store.clone(),
        CacheSettings::default(),
    ));

    let link_service = Arc::new(LinkService::new(
        links.clone(),
        cache.clone(),
        bloom.clone(),
        CachePolicy::default(),
        BASE_URL,
    ));
    let stats_service = Arc::new(StatsService::new(
        links.clone(),
        access.clone(),
        CounterStore::new(store.clone()),
    ));

    let state = AppState {
        link_service,
        stats_service,
        links: links.clone(),
        bloom: bloom.clone(),
        remote: store.clone(),
        transport: transport.clone(),
        behind_proxy: false,
    };

    TestApp {
        state,
        links,
        access,
        store,
        transport,
        cache,
        bloom,
    }
}

/// Inserts `ConnectInfo` so handlers that read the peer address work
/// without a real socket.
#[derive(Clone)]
pub struct MockConnectInfoLayer;

impl<S> Layer<S> for MockConnectInfoLayer {
    type Service = MockConnectInfoService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MockConnectInfoService { inner }
    }
}

#[derive(Clone)]
pub struct MockConnectInfoService<S> {
    inner: S,
}

impl<S, B> tower::Service<axum::http::Request<B>> for MockConnectInfoService<S>
where
    S: tower::Service<axum::http::Request<B>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: axum::http::Request<B>) -> Self::Future {
        let addr: SocketAddr = "127.0.0.1:12345".parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(addr));
        self.inner.call(req)
    }
}
