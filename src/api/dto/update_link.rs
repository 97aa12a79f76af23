//! DTO for the link update endpoint.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Request body for `PATCH /api/links/{code}`.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateLinkRequest {
    /// New destination URL for this link.
    #[validate(length(min = 1, max = 2048))]
    pub url: String,
}

/// Link as returned after an update.
#[derive(Debug, Serialize)]
pub struct LinkResponse {
    pub code: String,
    pub long_url: String,
    pub short_url: String,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}
