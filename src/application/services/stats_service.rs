//! Per-link access statistics.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::application::ingest::{AccessCounters, CounterStore};
use crate::domain::repositories::{AccessRepository, LinkRepository};
use crate::error::AppError;

/// Counters plus link metadata for one code.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkStats {
    pub code: String,
    pub long_url: String,
    pub created_at: DateTime<Utc>,
    pub counters: AccessCounters,
    /// Access rows durably stored so far; trails `page_views` while events
    /// are in flight.
    pub stored_accesses: i64,
}

pub struct StatsService {
    links: Arc<dyn LinkRepository>,
    access: Arc<dyn AccessRepository>,
    counters: CounterStore,
}

impl StatsService {
    pub fn new(
        links: Arc<dyn LinkRepository>,
        access: Arc<dyn AccessRepository>,
        counters: CounterStore,
    ) -> Self {
        Self {
            links,
            access,
            counters,
        }
    }

    /// Cache-tier counters for `code`, without link metadata.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] if the counter store is unreachable.
    pub async fn counters(&self, code: &str) -> Result<AccessCounters, AppError> {
        self.counters.fetch(code).await.map_err(|e| {
            AppError::internal(
                "Failed to read access counters",
                json!({ "code": code, "reason": e.to_string() }),
            )
        })
    }

    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if no live link has this code.
    pub async fn link_stats(&self, code: &str) -> Result<LinkStats, AppError> {
        let link = self
            .links
            .find_by_code(code)
            .await?
            .ok_or_else(|| AppError::not_found("Short link not found", json!({ "code": code })))?;

        let (counters, stored_accesses) =
            tokio::try_join!(self.counters(code), self.access.count_by_code(code))?;

        Ok(LinkStats {
            code: link.code,
            long_url: link.long_url,
            created_at: link.created_at,
            counters,
            stored_accesses,
        })
    }
}
