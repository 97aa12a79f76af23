//! API route configuration.

use crate::api::handlers::{
    delete_link_handler, rebuild_bloom_handler, shorten_handler, stats_handler,
    update_link_handler,
};
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, patch, post},
};

/// Routes nested under `/api`.
///
/// # Endpoints
///
/// - `POST   /shorten`                   - Create shortened URLs (batch-capable)
/// - `PATCH  /links/{code}`              - Change a link's destination
/// - `DELETE /links/{code}`              - Soft-delete a link
/// - `GET    /stats/{code}`              - Access counters for a link
/// - `POST   /maintenance/bloom/rebuild` - Rebuild the bloom filter
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/shorten", post(shorten_handler))
        .route(
            "/links/{code}",
            patch(update_link_handler).delete(delete_link_handler),
        )
        .route("/stats/{code}", get(stats_handler))
        .route("/maintenance/bloom/rebuild", post(rebuild_bloom_handler))
}
