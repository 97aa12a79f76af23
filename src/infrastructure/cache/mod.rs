//! Caching layer for fast redirect lookups.
//!
//! [`CacheAsideStore`] puts a bounded process-local tier in front of the shared
//! [`RemoteStore`](crate::infrastructure::kv::RemoteStore) and protects misses
//! with [`SingleFlight`] so one loader per key reaches the origin.

mod cache_aside;
mod error;
mod local;
mod singleflight;

pub use cache_aside::{CacheAsideStore, CacheLookup, CacheSettings};
pub use error::{CacheError, CacheResult};
pub use local::{Cached, LocalCache, jittered};
pub use singleflight::{Flight, SingleFlight};
