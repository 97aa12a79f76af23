//! Access event model published by the redirect path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request headers captured at redirect time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMeta {
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub accept_language: Option<String>,
}

/// A single resolution of a short code, as published to the event stream.
///
/// Delivery is at-least-once; `message_id` is the idempotency key that lets
/// the ingestion pipeline recognise redeliveries.
///
/// # Usage Flow
///
/// 1. Created in the redirect handler with request metadata
/// 2. Published fire-and-forget through an [`EventTransport`](crate::infrastructure::transport::EventTransport)
/// 3. Consumed by [`crate::application::ingest::IngestWorker`]
/// 4. Converted to [`crate::domain::entities::NewAccessRecord`] for persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessEvent {
    pub message_id: Uuid,
    pub code: String,
    pub long_url: String,
    pub headers: RequestMeta,
    pub client_ip: Option<String>,
    pub client_uid: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AccessEvent {
    /// Creates a new event with a fresh message id and the current time.
    pub fn new(
        code: String,
        long_url: String,
        headers: RequestMeta,
        client_ip: Option<String>,
        client_uid: Option<String>,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            code,
            long_url,
            headers,
            client_ip,
            client_uid,
            timestamp: Utc::now(),
        }
    }

    /// Serializes the event for the wire.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parses an event received from the wire.
    pub fn from_json(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }
}
