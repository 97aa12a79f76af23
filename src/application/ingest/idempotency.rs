//! Idempotency tokens for consumed messages.

use std::sync::Arc;
use std::time::Duration;
use tokio_retry::Retry;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::debug;

use crate::infrastructure::kv::{Claim, RemoteStore, StoreResult};

/// Attempts made for a token write before giving up.
const CLAIM_ATTEMPTS: usize = 3;

/// Whether a message is seen for the first time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Fresh,
    Duplicate,
}

/// Marks message ids as processed in the shared store.
///
/// A token is claimed before processing and deleted again if processing
/// fails, so a redelivery is admitted.
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn RemoteStore>,
    ttl: Duration,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn RemoteStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn key(message_id: &str) -> String {
        format!("ingest:msg:{message_id}")
    }

    /// Claims the token for `message_id`, retrying transient store failures
    /// with short jittered backoff.
    pub async fn claim(&self, message_id: &str) -> StoreResult<Admission> {
        let key = Self::key(message_id);
        let strategy = ExponentialBackoff::from_millis(10)
            .max_delay(Duration::from_millis(200))
            .map(jitter)
            .take(CLAIM_ATTEMPTS - 1);

        let claim = Retry::spawn(strategy, || self.store.set_nx(&key, "1", Some(self.ttl))).await?;

        match claim {
            Claim::Acquired => Ok(Admission::Fresh),
            Claim::Held(_) => {
                debug!("Duplicate message {}", message_id);
                Ok(Admission::Duplicate)
            }
        }
    }

    /// Forgets `message_id` so it can be processed again.
    pub async fn release(&self, message_id: &str) -> StoreResult<()> {
        self.store.del(&Self::key(message_id)).await.map(|_| ())
    }
}
