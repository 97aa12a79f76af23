//! Probabilistic existence gate for short codes.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::repositories::LinkRepository;
use crate::infrastructure::cache::SingleFlight;
use crate::infrastructure::kv::{RemoteStore, StoreError};
use crate::infrastructure::lock::{DistributedMutex, LockError};

use super::rebuild::RebuildReport;

#[derive(Debug, Clone, thiserror::Error)]
pub enum BloomError {
    #[error("bloom filter {name} unavailable: {source}")]
    Store { name: String, source: StoreError },

    #[error("bloom rebuild already running (held by {holder})")]
    RebuildInProgress { holder: String },

    #[error("bloom rebuild failed on shard {shard}: {reason}")]
    RebuildFailed { shard: u32, reason: String },

    #[error("bloom rebuild lock error: {0}")]
    Lock(LockError),
}

impl From<LockError> for BloomError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::AlreadyLocked { holder, .. } => BloomError::RebuildInProgress { holder },
            other => BloomError::Lock(other),
        }
    }
}

pub type BloomResult<T> = Result<T, BloomError>;

/// Live filter parameters.
#[derive(Debug, Clone)]
pub struct BloomSettings {
    pub name: String,
    pub error_rate: f64,
    pub capacity: u64,
    /// Rows fetched per page when scanning a partition during rebuild.
    pub rebuild_batch_size: i64,
    /// Lease of the fleet-wide rebuild lock; renewed while the rebuild runs.
    pub lock_lease: Duration,
}

impl Default for BloomSettings {
    fn default() -> Self {
        Self {
            name: "bloom:short_links".to_string(),
            error_rate: 0.001,
            capacity: 1_000_000,
            rebuild_batch_size: 1_000,
            lock_lease: Duration::from_secs(30),
        }
    }
}

/// Bloom-filter front for "does this code exist at all" questions.
///
/// A negative answer is authoritative; a positive one is only a hint that the
/// caller must confirm against the store.
pub struct BloomGate {
    pub(super) store: Arc<dyn RemoteStore>,
    pub(super) mutex: DistributedMutex,
    pub(super) settings: BloomSettings,
    pub(super) rebuilds: SingleFlight<BloomResult<RebuildReport>>,
}

impl BloomGate {
    pub fn new(store: Arc<dyn RemoteStore>, mutex: DistributedMutex, settings: BloomSettings) -> Self {
        Self {
            store,
            mutex,
            settings,
            rebuilds: SingleFlight::new(),
        }
    }

    pub fn settings(&self) -> &BloomSettings {
        &self.settings
    }

    fn failed(name: &str) -> impl FnOnce(StoreError) -> BloomError {
        let name = name.to_string();
        move |source| BloomError::Store { name, source }
    }

    pub async fn create(&self, name: &str, error_rate: f64, capacity: u64) -> BloomResult<()> {
        self.store
            .bf_reserve(name, error_rate, capacity)
            .await
            .map_err(Self::failed(name))
    }

    pub async fn add(&self, name: &str, value: &str) -> BloomResult<bool> {
        self.store
            .bf_add(name, value)
            .await
            .map_err(Self::failed(name))
    }

    pub async fn madd(&self, name: &str, values: &[String]) -> BloomResult<Vec<bool>> {
        self.store
            .bf_madd(name, values)
            .await
            .map_err(Self::failed(name))
    }

    pub async fn exists(&self, name: &str, value: &str) -> BloomResult<bool> {
        self.store
            .bf_exists(name, value)
            .await
            .map_err(Self::failed(name))
    }

    pub async fn mexists(&self, name: &str, values: &[String]) -> BloomResult<Vec<bool>> {
        self.store
            .bf_mexists(name, values)
            .await
            .map_err(Self::failed(name))
    }

    pub async fn delete(&self, name: &str) -> BloomResult<()> {
        self.store
            .del(name)
            .await
            .map(|_| ())
            .map_err(Self::failed(name))
    }

    /// Atomically replaces `new_name` with the filter at `name`.
    pub async fn rename(&self, name: &str, new_name: &str) -> BloomResult<()> {
        self.store
            .rename(name, new_name)
            .await
            .map_err(Self::failed(name))
    }

    /// Whether `code` may exist in the live filter.
    ///
    /// Fails open: if the filter cannot be queried the code is reported as
    /// possibly present so the caller falls through to the cache and store.
    pub async fn might_contain(&self, code: &str) -> bool {
        match self.exists(&self.settings.name, code).await {
            Ok(true) => true,
            Ok(false) => {
                debug!("Bloom negative: {}", code);
                metrics::counter!("bloom_negatives_total").increment(1);
                false
            }
            Err(e) => {
                warn!(error = %e, code, "Bloom check failed, assuming present");
                true
            }
        }
    }

    /// Key naming the shadow filter of a rebuild in progress.
    pub(super) fn shadow_pointer(&self) -> String {
        format!("{}:shadow", self.settings.name)
    }

    /// Adds `code` to the live filter and to the shadow filter of any rebuild
    /// in progress, so the rename cannot drop it.
    pub async fn register(&self, code: &str) -> BloomResult<()> {
        let pointer = self.shadow_pointer();
        let shadow = self
            .store
            .get(&pointer)
            .await
            .map_err(Self::failed(&pointer))?;

        if let Some(shadow) = shadow {
            // None once the shadow has been renamed over the live filter.
            self.store
                .bf_add_existing(&shadow, code)
                .await
                .map_err(Self::failed(&shadow))?;
        }

        self.add(&self.settings.name, code).await.map(|_| ())
    }

    /// Rebuilds the live filter if it does not exist yet.
    ///
    /// Returns `Ok(None)` when the filter already exists or another instance
    /// is building it.
    pub async fn ensure(&self, links: Arc<dyn LinkRepository>) -> BloomResult<Option<RebuildReport>> {
        let name = &self.settings.name;
        let present = self.store.exists(name).await.map_err(Self::failed(name))?;
        if present {
            debug!("Bloom filter {} present", name);
            return Ok(None);
        }

        info!("Bloom filter {} missing, rebuilding", name);
        match self.rebuild(links).await {
            Ok(report) => Ok(Some(report)),
            Err(BloomError::RebuildInProgress { holder }) => {
                info!(holder = %holder, "Bloom rebuild already running elsewhere");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
