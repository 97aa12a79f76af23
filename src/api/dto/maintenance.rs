//! DTOs for maintenance endpoints.

use serde::Serialize;

use crate::infrastructure::bloom::RebuildReport;

/// Outcome of a bloom filter rebuild.
#[derive(Debug, Serialize)]
pub struct RebuildResponse {
    pub filter: String,
    pub shards: u32,
    pub indexed: u64,
    pub caught_up: u64,
}

impl RebuildResponse {
    pub fn new(filter: impl Into<String>, report: RebuildReport) -> Self {
        Self {
            filter: filter.into(),
            shards: report.shards,
            indexed: report.indexed,
            caught_up: report.caught_up,
        }
    }
}
