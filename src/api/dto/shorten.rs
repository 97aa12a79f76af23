//! DTOs for link shortening endpoint.

use crate::error::ErrorInfo;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Request to shorten one or more URLs.
///
/// Supports batch processing for efficiency when creating multiple links.
#[derive(Debug, Deserialize, Validate)]
pub struct ShortenRequest {
    #[validate(length(min = 1, max = 100), nested)]
    pub urls: Vec<UrlItem>,
}

/// Individual URL to be shortened.
///
/// Scheme, host and code rules are enforced per item by the link service so
/// one bad entry does not fail the whole batch.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct UrlItem {
    #[validate(length(min = 1, max = 2048))]
    pub url: String,

    /// Optional custom short code.
    pub custom_code: Option<String>,
}

/// Response containing batch processing results.
#[derive(Debug, Serialize)]
pub struct ShortenResponse {
    pub summary: BatchSummary,
    pub items: Vec<ShortenResultItem>,
}

/// Individual result for a URL in the batch.
///
/// Uses untagged enum for cleaner JSON structure (no discriminator field).
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ShortenResultItem {
    Success {
        long_url: String,
        code: String,
        short_url: String,
    },
    Error {
        long_url: String,
        error: ErrorInfo,
    },
}

#[derive(Debug, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}
