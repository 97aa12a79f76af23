//! Remote key/value store abstraction.
//!
//! Every shared-state component (cache, lock, bloom filter, counters,
//! idempotency tokens) talks to a [`RemoteStore`]. [`RedisStore`] is the
//! production backend; [`MemoryStore`] serves single-node runs and tests.

pub mod bloom_bits;
mod memory_store;
mod redis_store;
mod store;

pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;
pub use store::{Claim, PipelineOp, RemoteStore, StoreError, StoreResult};
