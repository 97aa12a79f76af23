//! Link entity representing a short code mapping.

use chrono::{DateTime, Utc};

/// A short code and the destination it resolves to.
///
/// Links live in the partition chosen by [`crate::domain::sharding::ShardRouter`]
/// for their `code`; `id` is strictly increasing within that partition and is
/// the cursor used by full scans.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub id: i64,
    pub code: String,
    pub long_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Link {
    /// Creates a new Link instance.
    pub fn new(
        id: i64,
        code: String,
        long_url: String,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        deleted_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            code,
            long_url,
            created_at,
            updated_at,
            deleted_at,
        }
    }

    /// Returns true if the link has been soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Input data for creating a new link.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLink {
    pub code: String,
    pub long_url: String,
}

/// Partial update for an existing link.
///
/// `None` fields are left unchanged. `deleted: Some(true)` soft-deletes the
/// link, `Some(false)` restores it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkPatch {
    pub long_url: Option<String>,
    pub deleted: Option<bool>,
}

impl LinkPatch {
    /// A patch that only changes the destination.
    pub fn destination(long_url: impl Into<String>) -> Self {
        Self {
            long_url: Some(long_url.into()),
            deleted: None,
        }
    }

    /// A patch that soft-deletes the link.
    pub fn delete() -> Self {
        Self {
            long_url: None,
            deleted: Some(true),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.long_url.is_none() && self.deleted.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_creation() {
        let now = Utc::now();
        let link = Link::new(
            1,
            "abc123".to_string(),
            "https://example.com".to_string(),
            now,
            now,
            None,
        );

        assert_eq!(link.id, 1);
        assert_eq!(link.code, "abc123");
        assert_eq!(link.long_url, "https://example.com");
        assert!(!link.is_deleted());
    }

    #[test]
    fn test_link_is_deleted() {
        let now = Utc::now();
        let link = Link::new(
            1,
            "code".to_string(),
            "https://example.com".to_string(),
            now,
            now,
            Some(now),
        );
        assert!(link.is_deleted());
    }

    #[test]
    fn test_patch_constructors() {
        let patch = LinkPatch::destination("https://rust-lang.org");
        assert_eq!(patch.long_url.as_deref(), Some("https://rust-lang.org"));
        assert!(patch.deleted.is_none());

        assert_eq!(LinkPatch::delete().deleted, Some(true));
        assert!(LinkPatch::default().is_empty());
        assert!(!LinkPatch::delete().is_empty());
    }
}
