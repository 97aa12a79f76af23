//! Lease-based distributed mutex over a [`RemoteStore`].

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::infrastructure::kv::{Claim, RemoteStore, StoreError};

#[derive(Debug, Clone, thiserror::Error)]
pub enum LockError {
    #[error("lock {key} is held by {holder}")]
    AlreadyLocked { key: String, holder: String },

    #[error("failed to acquire lock {key}: {source}")]
    AcquireFailed { key: String, source: StoreError },

    #[error("failed to refresh lock {key}: {reason}")]
    RefreshFailed { key: String, reason: String },

    #[error("failed to release lock {key}: {source}")]
    UnlockFailed { key: String, source: StoreError },

    #[error("lock {key} is no longer held by this owner")]
    NotOwner { key: String },
}

impl LockError {
    pub fn is_already_locked(&self) -> bool {
        matches!(self, LockError::AlreadyLocked { .. })
    }
}

/// How a lock is held.
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    /// Expiry of the lock key; zero holds the lock until released.
    pub lease: Duration,
    /// Keep extending the lease in the background while the handle lives.
    pub watchdog: bool,
}

impl LockOptions {
    pub fn lease(lease: Duration) -> Self {
        Self {
            lease,
            watchdog: false,
        }
    }

    pub fn with_watchdog(mut self) -> Self {
        self.watchdog = true;
        self
    }
}

/// Mutual exclusion shared by every process using the same store.
///
/// Acquisition is a single atomic set-if-absent; there is no queueing or
/// fairness between waiters.
#[derive(Clone)]
pub struct DistributedMutex {
    store: Arc<dyn RemoteStore>,
}

impl DistributedMutex {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    /// Attempts to take `key` once.
    ///
    /// # Errors
    ///
    /// - [`LockError::AlreadyLocked`] with the current holder's token
    /// - [`LockError::AcquireFailed`] if the store is unreachable
    pub async fn acquire(&self, key: &str, options: LockOptions) -> Result<LockHandle, LockError> {
        let token = Uuid::new_v4().to_string();
        let ttl = (!options.lease.is_zero()).then_some(options.lease);

        let claim = self
            .store
            .set_nx(key, &token, ttl)
            .await
            .map_err(|source| LockError::AcquireFailed {
                key: key.to_string(),
                source,
            })?;

        if let Claim::Held(holder) = claim {
            debug!(key, holder = %holder, "Lock contended");
            metrics::counter!("lock_contention_total").increment(1);
            return Err(LockError::AlreadyLocked {
                key: key.to_string(),
                holder,
            });
        }

        let watchdog = (options.watchdog && ttl.is_some()).then(|| {
            Watchdog::spawn(
                self.store.clone(),
                key.to_string(),
                token.clone(),
                options.lease,
            )
        });

        debug!(key, token = %token, "Lock acquired");
        Ok(LockHandle {
            key: key.to_string(),
            token,
            store: self.store.clone(),
            watchdog,
        })
    }

    /// Polls [`acquire`](Self::acquire) every `poll_interval` until it
    /// succeeds or `max_wait` elapses.
    ///
    /// # Errors
    ///
    /// Returns the last [`LockError::AlreadyLocked`] on timeout; store
    /// failures are returned immediately.
    pub async fn try_lock(
        &self,
        key: &str,
        options: LockOptions,
        poll_interval: Duration,
        max_wait: Duration,
    ) -> Result<LockHandle, LockError> {
        let deadline = Instant::now() + max_wait;

        loop {
            match self.acquire(key, options).await {
                Err(e) if e.is_already_locked() && Instant::now() + poll_interval <= deadline => {
                    tokio::time::sleep(poll_interval).await;
                }
                other => return other,
            }
        }
    }
}

struct Watchdog {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Watchdog {
    fn spawn(store: Arc<dyn RemoteStore>, key: String, token: String, lease: Duration) -> Self {
        let (stop, mut stopped) = oneshot::channel::<()>();
        let interval = lease * 2 / 3;

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = tokio::time::sleep(interval) => {
                        let reason = match store.expire_if_eq(&key, &token, lease).await {
                            Ok(true) => {
                                debug!(key = %key, "Lock lease extended");
                                continue;
                            }
                            Ok(false) => "lock is held by another owner".to_string(),
                            Err(e) => e.to_string(),
                        };

                        let err = LockError::RefreshFailed { key: key.clone(), reason };
                        warn!(error = %err, "Stopping lock watchdog");
                        break;
                    }
                }
            }
        });

        Self { stop, task }
    }

    async fn stop(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            warn!(error = %e, "Lock watchdog ended abnormally");
        }
    }
}

/// Proof of ownership of a distributed lock.
///
/// Dropping the handle stops lease renewal but leaves the key to expire on
/// its own; call [`release`](Self::release) to free it immediately.
pub struct LockHandle {
    key: String,
    token: String,
    store: Arc<dyn RemoteStore>,
    watchdog: Option<Watchdog>,
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("key", &self.key)
            .field("token", &self.token)
            .field("renewing", &self.is_renewing())
            .finish()
    }
}

impl LockHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Owner token stored under the lock key.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Whether the watchdog is still extending the lease.
    pub fn is_renewing(&self) -> bool {
        self.watchdog
            .as_ref()
            .is_some_and(|w| !w.task.is_finished())
    }

    /// Stops renewal, then deletes the key if this handle still owns it.
    ///
    /// # Errors
    ///
    /// - [`LockError::NotOwner`] if the lease expired and someone else took the lock
    /// - [`LockError::UnlockFailed`] if the store is unreachable; the key then
    ///   expires with its lease
    pub async fn release(mut self) -> Result<(), LockError> {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.stop().await;
        }

        match self.store.del_if_eq(&self.key, &self.token).await {
            Ok(true) => {
                info!(key = %self.key, "Lock released");
                Ok(())
            }
            Ok(false) => Err(LockError::NotOwner {
                key: self.key.clone(),
            }),
            Err(source) => Err(LockError::UnlockFailed {
                key: self.key.clone(),
                source,
            }),
        }
    }
}
