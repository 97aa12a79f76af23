//! Domain layer containing business entities and logic.
//!
//! Entities, repository contracts and the shard routing function, independent
//! of infrastructure and presentation concerns.
//!
//! # Architecture
//!
//! - [`entities`] - Core business data structures
//! - [`repositories`] - Data access trait definitions
//! - [`sharding`] - Deterministic key-to-partition routing
//! - [`access_event`] - Access event model published on every redirect
//!
//! # Access Processing Flow
//!
//! 1. The redirect handler publishes an [`access_event::AccessEvent`]
//! 2. Ingestion workers (see [`crate::application::ingest`]) consume it,
//!    deduplicate it and enrich it
//! 3. The batching writer persists it via [`repositories::AccessRepository`]

pub mod access_event;
pub mod entities;
pub mod repositories;
pub mod sharding;
