//! PostgreSQL repository implementations.
//!
//! Concrete implementations of domain repository traits using SQLx. Each
//! sharded entity is spread over `{table}_{i}` partitions chosen by
//! [`ShardRouter`](crate::domain::sharding::ShardRouter); partitions are
//! created idempotently by `ensure_schema`.
//!
//! # Repositories
//!
//! - [`PgLinkRepository`] - Link storage, lookups and cursor scans
//! - [`PgAccessRepository`] - Batched access record writes

pub mod pg_access_repository;
pub mod pg_link_repository;

pub use pg_access_repository::PgAccessRepository;
pub use pg_link_repository::PgLinkRepository;
