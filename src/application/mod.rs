//! Application layer: services used by HTTP handlers and the ingestion
//! pipeline that runs beside them.
//!
//! - [`services::LinkService`] - Resolution, creation and editing of links
//! - [`services::StatsService`] - Access counters per link
//! - [`ingest::IngestionPipeline`] - Idempotent, batched access-event ingestion

pub mod ingest;
pub mod services;
