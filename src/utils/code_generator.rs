//! Short code generation and validation.

use crate::error::AppError;
use rand::Rng;
use rand::distr::Alphanumeric;
use regex::Regex;
use serde_json::json;
use std::sync::LazyLock;

/// Length of generated codes: 62^8 possible values.
pub const GENERATED_CODE_LENGTH: usize = 8;

pub const MIN_CODE_LENGTH: usize = 4;
pub const MAX_CODE_LENGTH: usize = 32;

/// Path segments owned by the service itself.
const RESERVED_CODES: &[&str] = &["api", "health", "stats", "admin", "maintenance", "metrics"];

static CODE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9_-]*[A-Za-z0-9])?$").unwrap());

/// Random alphanumeric code of [`GENERATED_CODE_LENGTH`] characters.
pub fn generate_code() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_CODE_LENGTH)
        .map(char::from)
        .collect()
}

/// Whether `code` could name a link at all.
///
/// Used on the redirect path to reject garbage before any lookup.
pub fn is_well_formed(code: &str) -> bool {
    (MIN_CODE_LENGTH..=MAX_CODE_LENGTH).contains(&code.len()) && CODE_REGEX.is_match(code)
}

/// Validates a user-chosen code.
///
/// # Rules
///
/// - 4 to 32 characters
/// - ASCII letters, digits, `-` and `_`, starting and ending with a letter or digit
/// - not a reserved path segment (case-insensitive)
///
/// # Errors
///
/// Returns [`AppError::Validation`] naming the violated rule.
pub fn validate_custom_code(code: &str) -> Result<(), AppError> {
    if !(MIN_CODE_LENGTH..=MAX_CODE_LENGTH).contains(&code.len()) {
        return Err(AppError::bad_request(
            format!("Custom code must be {MIN_CODE_LENGTH}-{MAX_CODE_LENGTH} characters"),
            json!({ "provided_length": code.len() }),
        ));
    }

    if !CODE_REGEX.is_match(code) {
        return Err(AppError::bad_request(
            "Custom code may only contain letters, digits, '-' and '_', and must start and end with a letter or digit",
            json!({ "code": code }),
        ));
    }

    if RESERVED_CODES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(code))
    {
        return Err(AppError::bad_request(
            "This code is reserved",
            json!({ "code": code }),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_codes_are_well_formed() {
        for _ in 0..100 {
            let code = generate_code();
            assert_eq!(code.len(), GENERATED_CODE_LENGTH);
            assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
            assert!(is_well_formed(&code));
        }
    }

    #[test]
    fn test_generated_codes_are_distinct() {
        let codes: HashSet<String> = (0..1000).map(|_| generate_code()).collect();
        assert_eq!(codes.len(), 1000);
    }

    #[test]
    fn test_accepts_mixed_case_codes() {
        assert!(validate_custom_code("aZ3x9Qk1").is_ok());
        assert!(validate_custom_code("promo_2025").is_ok());
        assert!(validate_custom_code("my-link").is_ok());
    }

    #[test]
    fn test_rejects_bad_length() {
        let err = validate_custom_code("abc").unwrap_err();
        assert!(err.to_string().contains("4-32 characters"));
        assert!(validate_custom_code(&"a".repeat(33)).is_err());
    }

    #[test]
    fn test_rejects_bad_characters() {
        assert!(validate_custom_code("my code").is_err());
        assert!(validate_custom_code("code@123").is_err());
        assert!(validate_custom_code("-leading").is_err());
        assert!(validate_custom_code("trailing_").is_err());
    }

    #[test]
    fn test_rejects_reserved_codes() {
        assert!(validate_custom_code("health").is_err());
        assert!(validate_custom_code("Stats").is_err());
    }

    #[test]
    fn test_well_formed() {
        assert!(is_well_formed("aZ3x9Qk1"));
        assert!(!is_well_formed("favicon.ico"));
        assert!(!is_well_formed("a"));
    }
}
