//! Bloom filter gating for short code existence checks.
//!
//! [`BloomGate`] answers "can this code exist" before the cache or store is
//! touched, hints uniqueness for generated codes, and rebuilds the filter
//! from the link partitions under a distributed lock.

mod gate;
mod rebuild;

pub use gate::{BloomError, BloomGate, BloomResult, BloomSettings};
pub use rebuild::RebuildReport;
