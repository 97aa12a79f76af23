//! Helpers shared by the HTTP layer and services.
//!
//! - [`code_generator`] - Short code generation and validation
//! - [`url_normalizer`] - Destination URL canonicalization
//! - [`client_identity`] - Client address and visitor id from request headers
//! - [`db_error`] - Database error classification

pub mod client_identity;
pub mod code_generator;
pub mod db_error;
pub mod url_normalizer;
