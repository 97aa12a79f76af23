//! Shared application state injected into every handler.

use std::sync::Arc;

use crate::application::services::{LinkService, StatsService};
use crate::domain::repositories::LinkRepository;
use crate::infrastructure::bloom::BloomGate;
use crate::infrastructure::kv::RemoteStore;
use crate::infrastructure::transport::EventTransport;

/// Everything a request needs, constructed once in [`crate::server::run`].
///
/// Cheap to clone: every field is reference counted.
#[derive(Clone)]
pub struct AppState {
    pub link_service: Arc<LinkService>,
    pub stats_service: Arc<StatsService>,
    pub links: Arc<dyn LinkRepository>,
    pub bloom: Arc<BloomGate>,
    pub remote: Arc<dyn RemoteStore>,
    pub transport: Arc<dyn EventTransport>,
    /// Trust forwarding headers when identifying clients.
    pub behind_proxy: bool,
}
