//! Handlers for fleet-wide maintenance tasks.

use axum::{Json, extract::State};
use tracing::info;

use crate::api::dto::maintenance::RebuildResponse;
use crate::error::AppError;
use crate::state::AppState;

/// Rebuilds the bloom filter from every link partition.
///
/// # Endpoint
///
/// `POST /api/maintenance/bloom/rebuild`
///
/// Only one instance in the fleet rebuilds at a time; concurrent requests
/// within this instance wait for and share the running rebuild.
///
/// # Errors
///
/// Returns 409 Conflict if another instance is rebuilding.
/// Returns 500 if a partition scan fails; the live filter is left as it was.
pub async fn rebuild_bloom_handler(
    State(state): State<AppState>,
) -> Result<Json<RebuildResponse>, AppError> {
    let report = state.bloom.rebuild(state.links.clone()).await?;
    info!(
        indexed = report.indexed,
        caught_up = report.caught_up,
        "Bloom filter rebuilt on request"
    );

    Ok(Json(RebuildResponse::new(
        state.bloom.settings().name.clone(),
        report,
    )))
}
