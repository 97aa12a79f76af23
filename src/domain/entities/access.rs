//! Access record entity: a redirect that has been enriched and persisted.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::access_event::AccessEvent;

/// Best-effort enrichment attached to an access.
///
/// Every field is optional: geolocation and user-agent lookups may fail
/// independently and the record is still stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enrichment {
    pub browser: Option<String>,
    pub os: Option<String>,
    pub device: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
}

/// Input data for recording an access.
///
/// `message_id` is unique per partition, so replaying the same event can
/// never produce a second row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAccessRecord {
    pub message_id: Uuid,
    pub code: String,
    pub long_url: String,
    pub client_ip: Option<String>,
    pub client_uid: Option<String>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub enrichment: Enrichment,
    pub accessed_at: DateTime<Utc>,
}

impl NewAccessRecord {
    /// Builds a record from a consumed event and whatever enrichment succeeded.
    pub fn from_event(event: &AccessEvent, enrichment: Enrichment) -> Self {
        Self {
            message_id: event.message_id,
            code: event.code.clone(),
            long_url: event.long_url.clone(),
            client_ip: event.client_ip.clone(),
            client_uid: event.client_uid.clone(),
            user_agent: event.headers.user_agent.clone(),
            referer: event.headers.referer.clone(),
            enrichment,
            accessed_at: event.timestamp,
        }
    }
}
