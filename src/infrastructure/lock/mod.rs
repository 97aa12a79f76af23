//! Distributed locking.
//!
//! [`DistributedMutex`] serializes maintenance work (bloom rebuilds) across
//! service instances sharing one remote store.

mod mutex;

pub use mutex::{DistributedMutex, LockError, LockHandle, LockOptions};
