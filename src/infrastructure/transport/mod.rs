//! Event transport between the redirect path and the ingestion workers.

mod event_transport;
mod memory;
mod redis_stream;

pub use event_transport::{Delivery, EventTransport, TransportError, TransportResult};
pub use memory::MemoryTransport;
pub use redis_stream::{RedisStreamTransport, StreamSettings};
