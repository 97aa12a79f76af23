//! Repository trait for short link data access.

use crate::domain::entities::{Link, LinkPatch, NewLink};
use crate::error::AppError;
use async_trait::async_trait;

/// Repository interface for sharded short links.
///
/// Every operation keyed by code touches exactly one partition, chosen by
/// [`crate::domain::sharding::ShardRouter`]. Soft-deleted links are invisible
/// to lookups and updates but still reserve their code.
///
/// # Implementations
///
/// - [`crate::infrastructure::persistence::PgLinkRepository`] - PostgreSQL implementation
/// - Test mocks available with `cfg(test)`
///
/// # Examples
///
/// See integration tests: `tests/repository_link.rs`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LinkRepository: Send + Sync {
    /// Number of partitions links are spread over.
    fn shard_count(&self) -> u32;

    /// Creates every link partition that does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on database errors.
    async fn ensure_schema(&self) -> Result<(), AppError>;

    /// Creates a new short link in the partition owning its code.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Conflict`] if the code is already taken.
    /// Returns [`AppError::Internal`] on database errors.
    async fn insert(&self, new_link: NewLink) -> Result<Link, AppError>;

    /// Finds a live link by its short code.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Link))` if found
    /// - `Ok(None)` if not found or deleted
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on database errors.
    async fn find_by_code(&self, code: &str) -> Result<Option<Link>, AppError>;

    /// Finds live links for several codes, querying each partition once.
    ///
    /// Missing codes are simply absent from the result; order is unspecified.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on database errors.
    async fn find_by_codes(&self, codes: &[String]) -> Result<Vec<Link>, AppError>;

    /// Partially updates a live link.
    ///
    /// Only fields present in [`LinkPatch`] are modified. `deleted: Some(true)`
    /// soft-deletes the link.
    ///
    /// # Returns
    ///
    /// The updated link, or `Ok(None)` if no live link has this code.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on database errors.
    async fn update_by_code(&self, code: &str, patch: LinkPatch) -> Result<Option<Link>, AppError>;

    /// Cursor scan over one partition: `(id, code)` pairs with `id > after_id`,
    /// ascending, at most `limit` rows. Deleted links are included.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on database errors.
    async fn scan_codes(
        &self,
        shard: u32,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<(i64, String)>, AppError>;
}
