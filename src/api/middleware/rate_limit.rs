//! Rate limiting middleware using token bucket algorithm.

use axum::extract::ConnectInfo;
use axum::http::Request;
use governor::clock::QuantaInstant;
use governor::middleware::NoOpMiddleware;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tower_governor::{
    GovernorError, GovernorLayer, governor::GovernorConfigBuilder, key_extractor::KeyExtractor,
};

use crate::utils::client_identity::client_ip;

pub type RateLimitLayer =
    GovernorLayer<ClientIpKeyExtractor, NoOpMiddleware<QuantaInstant>, axum::body::Body>;

/// Keys requests by client IP, resolved the same way access events are.
///
/// With `behind_proxy` the first `X-Forwarded-For` hop (or `X-Real-IP`) is
/// used; otherwise, or when those headers are unusable, the socket peer.
#[derive(Debug, Clone, Copy)]
pub struct ClientIpKeyExtractor {
    behind_proxy: bool,
}

impl ClientIpKeyExtractor {
    pub fn new(behind_proxy: bool) -> Self {
        Self { behind_proxy }
    }
}

impl KeyExtractor for ClientIpKeyExtractor {
    type Key = IpAddr;

    fn name(&self) -> &'static str {
        "client IP"
    }

    fn extract<T>(&self, req: &Request<T>) -> Result<Self::Key, GovernorError> {
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        client_ip(req.headers(), peer, self.behind_proxy)
            .and_then(|ip| ip.parse().ok())
            .ok_or(GovernorError::UnableToExtractKey)
    }

    fn key_name(&self, key: &Self::Key) -> Option<String> {
        Some(key.to_string())
    }
}

/// Public endpoints: one request every 20 ms (50 per second).
pub const PUBLIC_REPLENISH_MS: u64 = 20;
pub const PUBLIC_BURST: u32 = 200;

/// `/api` endpoints: one request every 500 ms (2 per second).
pub const API_REPLENISH_MS: u64 = 500;
pub const API_BURST: u32 = 20;

/// Builds a per-client limiter that regains one request every
/// `replenish_ms` and allows `burst_size` back to back.
fn build(behind_proxy: bool, replenish_ms: u64, burst_size: u32) -> RateLimitLayer {
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(replenish_ms)
            .burst_size(burst_size)
            .key_extractor(ClientIpKeyExtractor::new(behind_proxy))
            .finish()
            .expect("rate limit quota must be non-zero"),
    );

    GovernorLayer::new(governor_conf)
}

/// Limiter for public endpoints (redirects, health).
///
/// # Limits
///
/// - **Rate**: 50 requests per second
/// - **Burst**: 200 requests
///
/// Requests exceeding the limit receive `429 Too Many Requests`.
///
/// Without `behind_proxy` every request arriving through a load balancer
/// carries the balancer's address and shares one budget.
pub fn layer(behind_proxy: bool) -> RateLimitLayer {
    build(behind_proxy, PUBLIC_REPLENISH_MS, PUBLIC_BURST)
}

/// Stricter limiter for write and maintenance endpoints under `/api`.
///
/// # Limits
///
/// - **Rate**: 2 requests per second
/// - **Burst**: 20 requests
pub fn secure_layer(behind_proxy: bool) -> RateLimitLayer {
    build(behind_proxy, API_REPLENISH_MS, API_BURST)
}
