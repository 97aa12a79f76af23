//! Fleet-safe bloom filter rebuild.
//!
//! The filter is rebuilt into a shadow key and renamed over the live one, so
//! readers never observe a partially filled filter. While the shadow exists
//! its name is published under `{name}:shadow` and
//! [`register`](BloomGate::register) writes new codes into both filters. A
//! catch-up scan after the swap resumes each partition from its last cursor
//! for codes whose registration failed.

use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::gate::{BloomError, BloomGate, BloomResult};
use crate::domain::repositories::LinkRepository;
use crate::infrastructure::lock::LockOptions;

/// Summary of a completed rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    pub shards: u32,
    /// Codes written into the shadow filter before the swap.
    pub indexed: u64,
    /// Codes added to the live filter after the swap.
    pub caught_up: u64,
}

#[derive(Debug, Clone, Copy)]
struct ShardScan {
    shard: u32,
    last_id: i64,
    codes: u64,
}

impl BloomGate {
    /// Rebuilds the live filter from every link partition.
    ///
    /// Concurrent calls in this process share one rebuild; across processes
    /// the rebuild is serialized by a distributed lock.
    ///
    /// # Errors
    ///
    /// - [`BloomError::RebuildInProgress`] if another instance holds the lock
    /// - [`BloomError::RebuildFailed`] naming the first partition that failed;
    ///   the live filter is left untouched
    pub async fn rebuild(&self, links: Arc<dyn LinkRepository>) -> BloomResult<RebuildReport> {
        let flight = self
            .rebuilds
            .work(&self.settings.name, || self.rebuild_locked(links))
            .await;
        flight.value
    }

    async fn rebuild_locked(&self, links: Arc<dyn LinkRepository>) -> BloomResult<RebuildReport> {
        let lock_key = format!("lock:{}", self.settings.name);
        let options = LockOptions::lease(self.settings.lock_lease).with_watchdog();
        let handle = self.mutex.acquire(&lock_key, options).await?;

        info!("Rebuilding bloom filter {}", self.settings.name);
        let result = self.rebuild_shadow(links.as_ref()).await;

        if let Err(e) = handle.release().await {
            warn!(error = %e, "Failed to release bloom rebuild lock");
        }

        match &result {
            Ok(report) => info!(
                "✓ Bloom filter {} rebuilt: {} codes over {} shards ({} caught up)",
                self.settings.name, report.indexed, report.shards, report.caught_up
            ),
            Err(e) => warn!(error = %e, "Bloom rebuild aborted"),
        }
        result
    }

    async fn rebuild_shadow(&self, links: &dyn LinkRepository) -> BloomResult<RebuildReport> {
        let live = self.settings.name.as_str();
        let shadow = format!("{}:rebuild:{}", live, Uuid::new_v4());
        let shards = links.shard_count();

        let pointer = self.shadow_pointer();

        self.create(&shadow, self.settings.error_rate, self.settings.capacity)
            .await?;
        if let Err(e) = self.store.set(&pointer, &shadow, None).await {
            self.discard_shadow(&shadow).await;
            return Err(BloomError::Store {
                name: pointer,
                source: e,
            });
        }

        let scans = (0..shards).map(|shard| self.fill_shard(&shadow, links, shard, 0));
        let cursors = match try_join_all(scans).await {
            Ok(cursors) => cursors,
            Err(e) => {
                self.discard_shadow(&shadow).await;
                return Err(e);
            }
        };

        if let Err(e) = self.rename(&shadow, live).await {
            self.discard_shadow(&shadow).await;
            return Err(e);
        }
        self.unpublish_shadow(&shadow).await;

        let catch_up = cursors
            .iter()
            .map(|scan| self.fill_shard(live, links, scan.shard, scan.last_id));
        let caught_up = try_join_all(catch_up).await?;

        Ok(RebuildReport {
            shards,
            indexed: cursors.iter().map(|s| s.codes).sum(),
            caught_up: caught_up.iter().map(|s| s.codes).sum(),
        })
    }

    /// Stops dual registration, then drops the shadow filter.
    async fn discard_shadow(&self, shadow: &str) {
        self.unpublish_shadow(shadow).await;
        if let Err(e) = self.delete(shadow).await {
            warn!(error = %e, shadow, "Failed to drop shadow bloom filter");
        }
    }

    async fn unpublish_shadow(&self, shadow: &str) {
        if let Err(e) = self.store.del_if_eq(&self.shadow_pointer(), shadow).await {
            warn!(error = %e, shadow, "Failed to clear shadow bloom pointer");
        }
    }

    /// Adds every code of `shard` with an id above `after_id` to `filter`.
    async fn fill_shard(
        &self,
        filter: &str,
        links: &dyn LinkRepository,
        shard: u32,
        after_id: i64,
    ) -> BloomResult<ShardScan> {
        let batch_size = self.settings.rebuild_batch_size.max(1);
        let mut scan = ShardScan {
            shard,
            last_id: after_id,
            codes: 0,
        };

        loop {
            let page = links
                .scan_codes(shard, scan.last_id, batch_size)
                .await
                .map_err(|e| BloomError::RebuildFailed {
                    shard,
                    reason: e.to_string(),
                })?;

            let Some(&(last_id, _)) = page.last() else {
                break;
            };
            let full = page.len() as i64 == batch_size;
            let codes: Vec<String> = page.into_iter().map(|(_, code)| code).collect();

            self.madd(filter, &codes)
                .await
                .map_err(|e| BloomError::RebuildFailed {
                    shard,
                    reason: e.to_string(),
                })?;

            scan.last_id = last_id;
            scan.codes += codes.len() as u64;
            if !full {
                break;
            }
        }

        Ok(scan)
    }
}
