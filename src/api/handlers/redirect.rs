//! Handler for short URL redirect.

use axum::{
    extract::{ConnectInfo, Path, State},
    http::HeaderMap,
    response::Redirect,
};
use std::net::SocketAddr;
use tracing::warn;

use crate::domain::access_event::AccessEvent;
use crate::error::AppError;
use crate::state::AppState;
use crate::utils::client_identity::{client_ip, client_uid, request_meta};

/// Redirects a short code to its original URL.
///
/// # Endpoint
///
/// `GET /{code}`
///
/// # Request Flow
///
/// 1. Bloom filter check; a negative answer is an immediate 404
/// 2. Local then remote cache tier
/// 3. On miss, one store lookup per code per process refills the cache,
///    caching absence as well
/// 4. Publish an access event without waiting for the transport
/// 5. Return 307 Temporary Redirect
///
/// # Errors
///
/// Returns 404 Not Found if the short code doesn't exist.
pub async fn redirect_handler(
    Path(code): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<Redirect, AppError> {
    let long_url = state.link_service.resolve(&code).await?;

    let ip = client_ip(&headers, Some(addr.ip()), state.behind_proxy);
    let uid = client_uid(&headers, ip.as_deref());
    let event = AccessEvent::new(code, long_url.clone(), request_meta(&headers), ip, uid);

    let transport = state.transport.clone();
    tokio::spawn(async move {
        if let Err(e) = transport.publish(&event).await {
            metrics::counter!("access_events_dropped_total").increment(1);
            warn!(code = %event.code, error = %e, "Failed to publish access event");
        }
    });

    Ok(Redirect::temporary(&long_url))
}
