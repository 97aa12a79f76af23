//! DTOs for per-link statistics.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::application::services::LinkStats;

/// Counters and metadata for one short link.
///
/// `page_views` comes from the cache tier and is updated as soon as an access
/// event is consumed; `stored_accesses` trails it until the batch writer
/// flushes.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub code: String,
    pub long_url: String,
    pub created_at: DateTime<Utc>,
    pub page_views: u64,
    pub unique_visitors: u64,
    pub unique_ips: u64,
    pub stored_accesses: i64,
}

impl From<LinkStats> for StatsResponse {
    fn from(stats: LinkStats) -> Self {
        Self {
            code: stats.code,
            long_url: stats.long_url,
            created_at: stats.created_at,
            page_views: stats.counters.page_views,
            unique_visitors: stats.counters.unique_visitors,
            unique_ips: stats.counters.unique_ips,
            stored_accesses: stats.stored_accesses,
        }
    }
}
