//! Infrastructure layer for external integrations.
//!
//! This layer implements interfaces defined by the domain layer and the
//! shared-state primitives the application builds on.
//!
//! # Modules
//!
//! - [`kv`] - Remote key/value store (Redis and in-memory implementations)
//! - [`cache`] - Two-tier cache-aside store with single-flight refill
//! - [`lock`] - Lease-based distributed mutex with watchdog renewal
//! - [`bloom`] - Bloom filter existence gate and fleet-safe rebuild
//! - [`persistence`] - PostgreSQL repository implementations over sharded partitions
//! - [`transport`] - Access event transport (Redis Streams and in-memory)
//! - [`enrichment`] - Geolocation and user-agent lookups

pub mod bloom;
pub mod cache;
pub mod enrichment;
pub mod kv;
pub mod lock;
pub mod persistence;
pub mod transport;
