//! Top-level router configuration.
//!
//! # Route Structure
//!
//! - `GET  /{code}`  - Short link redirect
//! - `GET  /health`  - Health check: database, remote store, transport
//! - `/api/*`        - Link management, statistics and maintenance
//!
//! # Middleware
//!
//! - **Tracing** - Structured request/response logging
//! - **Rate limiting** - Per-IP token bucket, stricter under `/api`
//! - **Path normalization** - Trailing slash handling

use crate::api;
use crate::api::handlers::{health_handler, redirect_handler};
use crate::api::middleware::{rate_limit, tracing};
use crate::state::AppState;
use axum::Router;
use axum::routing::get;
use tower::Layer;
use tower_http::normalize_path::{NormalizePath, NormalizePathLayer};

/// Constructs the application router with all routes and middleware.
///
/// Client addresses for rate limiting and access events come from
/// `X-Forwarded-For` / `X-Real-IP` when [`AppState::behind_proxy`] is set;
/// enable it only behind a trusted reverse proxy.
pub fn app_router(state: AppState) -> NormalizePath<Router> {
    let behind_proxy = state.behind_proxy;

    let api_router = api::routes::api_routes().layer(rate_limit::secure_layer(behind_proxy));

    let public = Router::new()
        .route("/health", get(health_handler))
        .route("/{code}", get(redirect_handler))
        .layer(rate_limit::layer(behind_proxy));

    let router = Router::new()
        .merge(public)
        .nest("/api", api_router)
        .with_state(state)
        .layer(tracing::layer());

    NormalizePathLayer::trim_trailing_slash().layer(router)
}
