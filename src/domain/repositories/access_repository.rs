//! Repository trait for access records.

use crate::domain::entities::NewAccessRecord;
use crate::error::AppError;
use async_trait::async_trait;

/// A batch insert that stopped part way.
///
/// The first `applied` records (in the order given) are durable; the record
/// at index `applied` caused `source`; everything after it was not attempted.
#[derive(Debug, Clone, thiserror::Error)]
#[error("batch write stopped after {applied} records: {source}")]
pub struct BatchWriteError {
    pub applied: usize,
    pub source: AppError,
}

/// Repository interface for sharded access records.
///
/// # Implementations
///
/// - [`crate::infrastructure::persistence::PgAccessRepository`] - PostgreSQL implementation
/// - Test mocks available with `cfg(test)`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccessRepository: Send + Sync {
    /// Creates every access partition that does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on database errors.
    async fn ensure_schema(&self) -> Result<(), AppError>;

    /// Writes `records` with one multi-row insert per partition run.
    ///
    /// Records whose `message_id` is already stored are skipped silently.
    /// Callers should sort records by partition so each run is as long as
    /// possible.
    ///
    /// # Returns
    ///
    /// Number of rows actually inserted (duplicates excluded).
    ///
    /// # Errors
    ///
    /// Returns [`BatchWriteError`] describing how many leading records were
    /// written before the failure.
    async fn insert_batch(&self, records: &[NewAccessRecord]) -> Result<u64, BatchWriteError>;

    /// Number of stored accesses for `code`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on database errors.
    async fn count_by_code(&self, code: &str) -> Result<i64, AppError>;
}
