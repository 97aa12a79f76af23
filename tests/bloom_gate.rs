mod common;

use async_trait::async_trait;
use shortlink_core::application::services::{CachePolicy, LinkService};
use shortlink_core::domain::entities::{Link, LinkPatch, NewLink};
use shortlink_core::domain::repositories::LinkRepository;
use shortlink_core::error::AppError;
use shortlink_core::infrastructure::bloom::{BloomError, BloomGate, BloomSettings};
use shortlink_core::infrastructure::kv::RemoteStore;
use shortlink_core::infrastructure::lock::{DistributedMutex, LockOptions};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

use common::{InstrumentedStore, MemoryLinkRepository};

/// Which repository call to hold open.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Hold {
    Insert,
    Scan,
}

/// Link repository that parks the first call of one kind until released.
struct GatedLinks {
    inner: Arc<MemoryLinkRepository>,
    hold: Hold,
    held: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl GatedLinks {
    fn new(inner: Arc<MemoryLinkRepository>, hold: Hold) -> Self {
        Self {
            inner,
            hold,
            held: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }

    async fn park(&self, call: Hold) {
        if call == self.hold && !self.held.swap(true, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }
}

#[async_trait]
impl LinkRepository for GatedLinks {
    fn shard_count(&self) -> u32 {
        self.inner.shard_count()
    }

    async fn ensure_schema(&self) -> Result<(), AppError> {
        self.inner.ensure_schema().await
    }

    async fn insert(&self, new_link: NewLink) -> Result<Link, AppError> {
        self.park(Hold::Insert).await;
        self.inner.insert(new_link).await
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Link>, AppError> {
        self.inner.find_by_code(code).await
    }

    async fn find_by_codes(&self, codes: &[String]) -> Result<Vec<Link>, AppError> {
        self.inner.find_by_codes(codes).await
    }

    async fn update_by_code(&self, code: &str, patch: LinkPatch) -> Result<Option<Link>, AppError> {
        self.inner.update_by_code(code, patch).await
    }

    async fn scan_codes(
        &self,
        shard: u32,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<(i64, String)>, AppError> {
        self.park(Hold::Scan).await;
        self.inner.scan_codes(shard, after_id, limit).await
    }
}

fn shadow_pointer(bloom: &BloomGate) -> String {
    format!("{}:shadow", bloom.settings().name)
}

#[tokio::test]
async fn test_rebuild_indexes_every_stored_code() {
    let app = common::create_test_app().await;
    let codes: Vec<String> = (0..250).map(|i| format!("seeded{i:04}")).collect();
    for code in &codes {
        app.links.seed(code, "https://example.com/");
    }

    // Seeded directly, so the live filter does not know them yet.
    assert!(!app.bloom.might_contain("seeded0000").await);

    let report = app.bloom.rebuild(app.links.clone()).await.unwrap();
    assert_eq!(report.shards, common::SHARDS);
    assert_eq!(report.indexed + report.caught_up, 250);

    let name = app.bloom.settings().name.clone();
    let present = app.bloom.mexists(&name, &codes).await.unwrap();
    assert!(present.into_iter().all(|p| p));
}

#[tokio::test]
async fn test_rebuild_refused_while_another_instance_holds_lock() {
    let app = common::create_test_app().await;
    let other_instance = DistributedMutex::new(app.store.clone());
    let lock_key = format!("lock:{}", app.bloom.settings().name);
    let held = other_instance
        .acquire(&lock_key, LockOptions::lease(Duration::from_secs(30)))
        .await
        .unwrap();

    let err = app.bloom.rebuild(app.links.clone()).await.unwrap_err();
    match err {
        BloomError::RebuildInProgress { holder } => assert_eq!(holder, held.token()),
        other => panic!("unexpected error: {other}"),
    }

    held.release().await.unwrap();
    assert!(app.bloom.rebuild(app.links.clone()).await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_rebuilds_in_one_process_share_result() {
    let app = common::create_test_app().await;
    for i in 0..20 {
        app.links.seed(&format!("shared{i:02}"), "https://example.com/");
    }
    let bloom = app.bloom.clone();

    let rebuilds: Vec<_> = (0..4)
        .map(|_| {
            let bloom = bloom.clone();
            let links = app.links.clone();
            tokio::spawn(async move { bloom.rebuild(links).await })
        })
        .collect();

    for rebuild in rebuilds {
        // Every caller either shared the running rebuild or ran its own
        // after it finished; none is turned away by its own lock.
        let report = rebuild.await.unwrap().unwrap();
        assert_eq!(report.indexed + report.caught_up, 20);
    }
}

#[tokio::test]
async fn test_created_codes_survive_rebuild() {
    let app = common::create_test_app().await;
    let link = app
        .state
        .link_service
        .create("https://example.com", None)
        .await
        .unwrap();

    app.bloom.rebuild(app.links.clone()).await.unwrap();

    assert!(app.bloom.might_contain(&link.code).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_create_committed_after_rebuild_swap_stays_visible() {
    let app = common::create_test_app().await;
    let gated = Arc::new(GatedLinks::new(app.links.clone(), Hold::Insert));
    let service = Arc::new(LinkService::new(
        gated.clone(),
        app.cache.clone(),
        app.bloom.clone(),
        CachePolicy::default(),
        common::BASE_URL,
    ));

    let create = tokio::spawn({
        let service = service.clone();
        async move { service.create("https://example.com/late", None).await }
    });
    gated.entered.notified().await;

    // The row is not committed yet, so neither scan of this rebuild sees it.
    app.bloom.rebuild(app.links.clone()).await.unwrap();

    gated.release.notify_one();
    let link = create.await.unwrap().unwrap();

    assert!(app.bloom.might_contain(&link.code).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_create_during_rebuild_scan_lands_in_shadow() {
    let app = common::create_test_app().await;
    let gated = Arc::new(GatedLinks::new(app.links.clone(), Hold::Scan));

    let rebuild = tokio::spawn({
        let bloom = app.bloom.clone();
        let links = gated.clone();
        async move { bloom.rebuild(links).await }
    });
    gated.entered.notified().await;

    let link = app
        .state
        .link_service
        .create("https://example.com/mid", None)
        .await
        .unwrap();

    let pointer = shadow_pointer(&app.bloom);
    let shadow = app
        .store
        .get(&pointer)
        .await
        .unwrap()
        .expect("rebuild publishes its shadow filter");
    assert!(app.bloom.exists(&shadow, &link.code).await.unwrap());

    gated.release.notify_one();
    rebuild.await.unwrap().unwrap();

    assert!(app.bloom.might_contain(&link.code).await);
    assert!(!app.store.exists(&pointer).await.unwrap());
    assert!(!app.store.exists(&shadow).await.unwrap());
}

#[tokio::test]
async fn test_failed_swap_drops_shadow_filter() {
    let store = Arc::new(InstrumentedStore::default());
    store.fail_renames();
    let links = Arc::new(MemoryLinkRepository::new(common::SHARDS));
    links.seed("kept0001", "https://example.com/");

    let bloom = BloomGate::new(
        store.clone(),
        DistributedMutex::new(store.clone()),
        BloomSettings::default(),
    );
    bloom.register("live0001").await.unwrap();

    let err = bloom.rebuild(links).await.unwrap_err();
    assert!(matches!(err, BloomError::Store { .. }));

    let shadow = store.renamed_from().expect("swap was attempted");
    assert!(!store.exists(&shadow).await.unwrap());
    assert!(!store.exists(&shadow_pointer(&bloom)).await.unwrap());

    // The live filter is untouched and the lock is free again.
    assert!(bloom.might_contain("live0001").await);
    let lock_key = format!("lock:{}", bloom.settings().name);
    assert!(!store.exists(&lock_key).await.unwrap());
}
