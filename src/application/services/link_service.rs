//! Short link resolution and management.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};

use crate::domain::entities::{Link, LinkPatch, NewLink};
use crate::domain::repositories::LinkRepository;
use crate::error::AppError;
use crate::infrastructure::bloom::BloomGate;
use crate::infrastructure::cache::CacheAsideStore;
use crate::utils::code_generator::{generate_code, is_well_formed, validate_custom_code};
use crate::utils::url_normalizer::normalize_url;

/// Attempts at finding a free generated code before giving up.
const MAX_GENERATE_ATTEMPTS: usize = 10;

/// Lifetimes of cached destinations and of cached absence.
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    pub ttl: Duration,
    pub empty_ttl: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            empty_ttl: Duration::from_secs(60),
        }
    }
}

fn cache_key(code: &str) -> String {
    format!("link:{code}")
}

fn not_found(code: &str) -> AppError {
    AppError::not_found("Short link not found", json!({ "code": code }))
}

/// Service for resolving, creating and editing short links.
///
/// Reads go bloom filter, then cache, then the owning partition. Writes keep
/// the bloom filter ahead of the store and drop the cached entry afterwards.
pub struct LinkService {
    links: Arc<dyn LinkRepository>,
    cache: Arc<CacheAsideStore>,
    bloom: Arc<BloomGate>,
    policy: CachePolicy,
    base_url: String,
}

impl LinkService {
    pub fn new(
        links: Arc<dyn LinkRepository>,
        cache: Arc<CacheAsideStore>,
        bloom: Arc<BloomGate>,
        policy: CachePolicy,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            links,
            cache,
            bloom,
            policy,
            base_url: base_url.into(),
        }
    }

    /// Destination for `code`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the code is malformed, rejected by
    /// the bloom filter, cached as absent or missing from the store.
    /// Returns [`AppError::Internal`] if the store fails.
    pub async fn resolve(&self, code: &str) -> Result<String, AppError> {
        if !is_well_formed(code) {
            return Err(not_found(code));
        }

        if !self.bloom.might_contain(code).await {
            return Err(not_found(code));
        }

        let links = self.links.clone();
        let destination = self
            .cache
            .get_or_load(
                &cache_key(code),
                self.policy.ttl,
                self.policy.empty_ttl,
                || async move {
                    debug!("Loading {} from store", code);
                    Ok(links.find_by_code(code).await?.map(|link| link.long_url))
                },
            )
            .await?;

        destination.ok_or_else(|| not_found(code))
    }

    /// Creates a link for `long_url`, with `custom_code` or a generated one.
    ///
    /// Generated codes are checked against the bloom filter first; the
    /// store's unique constraint stays the final authority.
    ///
    /// # Errors
    ///
    /// - [`AppError::Validation`] for a bad URL or custom code
    /// - [`AppError::Conflict`] if the custom code is taken
    /// - [`AppError::Internal`] if no free code was found or a store failed
    pub async fn create(&self, long_url: &str, custom_code: Option<String>) -> Result<Link, AppError> {
        let long_url = normalize_url(long_url).map_err(|e| {
            AppError::bad_request("Invalid URL format", json!({ "reason": e.to_string() }))
        })?;

        if let Some(code) = custom_code {
            validate_custom_code(&code)?;
            return self.insert(code, long_url).await;
        }

        for attempt in 1..=MAX_GENERATE_ATTEMPTS {
            let code = generate_code();
            if self.bloom.might_contain(&code).await {
                debug!(attempt, "Generated code {} may exist, regenerating", code);
                continue;
            }

            match self.insert(code, long_url.clone()).await {
                Err(AppError::Conflict { .. }) => {
                    debug!(attempt, "Generated code collided in store");
                }
                result => return result,
            }
        }

        Err(AppError::internal(
            "Failed to generate unique code",
            json!({ "attempts": MAX_GENERATE_ATTEMPTS }),
        ))
    }

    async fn insert(&self, code: String, long_url: String) -> Result<Link, AppError> {
        // A code missing from the filter would be unreachable, so the filter
        // is written first.
        self.bloom.register(&code).await.map_err(|e| {
            AppError::internal(
                "Link index unavailable",
                json!({ "code": code, "reason": e.to_string() }),
            )
        })?;

        let link = self.links.insert(NewLink { code, long_url }).await?;

        // A rebuild that scanned before the commit and swapped after the
        // first registration would otherwise drop the code.
        if let Err(e) = self.bloom.register(&link.code).await {
            warn!(code = %link.code, error = %e, "Failed to re-register code after insert");
        }

        // Drops an empty marker left by earlier lookups of this code.
        self.invalidate(&link.code).await;
        Ok(link)
    }

    /// Points `code` at a new destination.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if no live link has this code.
    pub async fn update(&self, code: &str, long_url: &str) -> Result<Link, AppError> {
        let long_url = normalize_url(long_url).map_err(|e| {
            AppError::bad_request("Invalid URL format", json!({ "reason": e.to_string() }))
        })?;

        let link = self
            .links
            .update_by_code(code, LinkPatch::destination(long_url))
            .await?
            .ok_or_else(|| not_found(code))?;

        self.invalidate(code).await;
        Ok(link)
    }

    /// Soft-deletes `code`; the code stays reserved.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if no live link has this code.
    pub async fn delete(&self, code: &str) -> Result<(), AppError> {
        self.links
            .update_by_code(code, LinkPatch::delete())
            .await?
            .ok_or_else(|| not_found(code))?;

        self.invalidate(code).await;
        Ok(())
    }

    pub fn short_url(&self, code: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), code)
    }

    async fn invalidate(&self, code: &str) {
        if let Err(e) = self.cache.delete(&cache_key(code)).await {
            warn!(code, error = %e, "Failed to invalidate cached link");
        }
    }
}
