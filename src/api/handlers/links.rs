//! Handlers for editing existing links.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use validator::Validate;

use crate::api::dto::update_link::{LinkResponse, UpdateLinkRequest};
use crate::error::AppError;
use crate::state::AppState;

/// Points a short link at a new destination.
///
/// # Endpoint
///
/// `PATCH /api/links/{code}`
///
/// ```json
/// { "url": "https://new-destination.com" }
/// ```
///
/// The cached destination is deleted, so the next redirect reads the new URL.
///
/// # Errors
///
/// Returns 404 Not Found if no live link has this code.
/// Returns 400 Bad Request if the URL is invalid.
pub async fn update_link_handler(
    Path(code): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<UpdateLinkRequest>,
) -> Result<Json<LinkResponse>, AppError> {
    payload.validate()?;

    let link = state.link_service.update(&code, &payload.url).await?;
    let short_url = state.link_service.short_url(&link.code);

    Ok(Json(LinkResponse {
        code: link.code,
        long_url: link.long_url,
        short_url,
        updated_at: link.updated_at,
    }))
}

/// Soft-deletes a short link.
///
/// # Endpoint
///
/// `DELETE /api/links/{code}`
///
/// The row keeps its code reserved; redirects for it return 404 as soon as
/// the cached destination is deleted, which happens before this returns.
///
/// # Errors
///
/// Returns 404 Not Found if the link doesn't exist or is already deleted.
pub async fn delete_link_handler(
    Path(code): Path<String>,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    state.link_service.delete(&code).await?;
    Ok(StatusCode::NO_CONTENT)
}
