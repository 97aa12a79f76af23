//! Core domain entities representing the business data model.
//!
//! Entities are plain data structures without infrastructure concerns.
//!
//! # Entity Types
//!
//! - [`Link`] - A short code mapped to its destination URL
//! - [`NewAccessRecord`] - An enriched access to a short link, ready to store
//!
//! # Design Pattern
//!
//! Separate structs are used for creation and mutation:
//! - `NewLink`, `NewAccessRecord` - For creating new records
//! - `LinkPatch` - For partial updates

pub mod access;
pub mod link;

pub use access::{Enrichment, NewAccessRecord};
pub use link::{Link, LinkPatch, NewLink};
