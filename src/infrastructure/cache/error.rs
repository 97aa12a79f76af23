//! Cache error types.

use crate::infrastructure::kv::StoreError;

/// Errors raised by [`super::CacheAsideStore`].
///
/// Remote failures carry the key so callers can log and fall back to the
/// origin; none of them invalidate the local tier.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("cache get failed for {key}: {source}")]
    CacheGetFailed { key: String, source: StoreError },

    #[error("cache set failed for {key}: {source}")]
    CacheSetFailed { key: String, source: StoreError },

    #[error("cache delete failed for {key}: {source}")]
    CacheDelFailed { key: String, source: StoreError },

    #[error("local cache rejected {key}: {reason}")]
    LocalRejected { key: String, reason: String },
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
