//! Repository trait definitions for the domain layer.
//!
//! These traits abstract access to the sharded relational store. Concrete
//! implementations live in `crate::infrastructure::persistence`; mock
//! implementations are generated via `mockall` for testing.
//!
//! # Available Repositories
//!
//! - [`LinkRepository`] - Short link reads, writes and cursor scans
//! - [`AccessRepository`] - Batched access record writes
//!
//! # Testing
//!
//! See integration tests in `tests/repository_*.rs` for usage examples.

pub mod access_repository;
pub mod link_repository;

pub use access_repository::{AccessRepository, BatchWriteError};
pub use link_repository::LinkRepository;

#[cfg(test)]
pub use access_repository::MockAccessRepository;
#[cfg(test)]
pub use link_repository::MockLinkRepository;
