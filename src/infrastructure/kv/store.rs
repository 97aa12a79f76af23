//! Remote key/value store contract.

use async_trait::async_trait;
use std::time::Duration;

/// Errors raised by a [`RemoteStore`] backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),

    #[error("store command {command} failed: {reason}")]
    Command {
        command: &'static str,
        reason: String,
    },
}

impl StoreError {
    pub fn command(command: &'static str, reason: impl ToString) -> Self {
        Self::Command {
            command,
            reason: reason.to_string(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of an atomic set-if-absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The key was absent and now holds the caller's value.
    Acquired,
    /// The key already existed; carries the value currently stored.
    Held(String),
}

impl Claim {
    pub fn is_acquired(&self) -> bool {
        matches!(self, Claim::Acquired)
    }
}

/// A write that can be sent in a single pipelined round trip.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOp {
    Incr(String),
    PfAdd(String, String),
    Expire(String, Duration),
}

/// Shared key/value store used by the cache, lock, bloom and counter layers.
///
/// Conditional operations (`set_nx`, `expire_if_eq`, `del_if_eq`) must be
/// atomic on the backend: a single server-side script on Redis, a single
/// critical section in memory.
///
/// # Implementations
///
/// - [`crate::infrastructure::kv::RedisStore`] - Redis with RedisBloom
/// - [`crate::infrastructure::kv::MemoryStore`] - In-process store for single-node runs and tests
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Round-trips to the backend.
    async fn ping(&self) -> StoreResult<()>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Value of `key` with its remaining time to live (`None` when the key
    /// never expires).
    async fn get_with_ttl(&self, key: &str) -> StoreResult<Option<(String, Option<Duration>)>>;

    /// Stores `value`, expiring after `ttl` when given.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Atomically stores `value` only if `key` is absent, with an optional expiry.
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<Claim>;

    /// Deletes `key`, returning whether it existed.
    async fn del(&self, key: &str) -> StoreResult<bool>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Atomically resets the expiry of `key` only while it still holds `value`.
    async fn expire_if_eq(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// Atomically deletes `key` only while it still holds `value`.
    async fn del_if_eq(&self, key: &str, value: &str) -> StoreResult<bool>;

    /// Renames `from` to `to`, replacing any existing `to`.
    async fn rename(&self, from: &str, to: &str) -> StoreResult<()>;

    async fn incr(&self, key: &str) -> StoreResult<i64>;

    /// Adds `member` to the cardinality estimator at `key`.
    async fn pfadd(&self, key: &str, member: &str) -> StoreResult<bool>;

    async fn pfcount(&self, key: &str) -> StoreResult<u64>;

    /// Executes writes in one round trip; replies are discarded.
    async fn pipeline(&self, ops: Vec<PipelineOp>) -> StoreResult<()>;

    async fn bf_reserve(&self, name: &str, error_rate: f64, capacity: u64) -> StoreResult<()>;

    async fn bf_add(&self, name: &str, item: &str) -> StoreResult<bool>;

    /// Like [`bf_add`](Self::bf_add) but never creates the filter: returns
    /// `None` when `name` does not exist.
    async fn bf_add_existing(&self, name: &str, item: &str) -> StoreResult<Option<bool>>;

    async fn bf_madd(&self, name: &str, items: &[String]) -> StoreResult<Vec<bool>>;

    /// Membership test; a missing filter reports every item absent.
    async fn bf_exists(&self, name: &str, item: &str) -> StoreResult<bool>;

    async fn bf_mexists(&self, name: &str, items: &[String]) -> StoreResult<Vec<bool>>;
}
