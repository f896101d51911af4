//! Request validation.
//!
//! Rejects empty, oversized, and injection-bearing queries before any work
//! begins, and sanitizes what passes: control characters stripped,
//! whitespace collapsed.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::GatewayError;

/// Maximum query length in characters.
const MAX_QUERY_CHARS: usize = 1000;

/// Injection patterns rejected outright. A small fixed set; the query is a
/// natural-language question and has no business containing any of these.
static INJECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)UNION\s+SELECT",
        r"(?i)DROP\s+TABLE",
        r"(?i)<script",
        r"(?i)javascript:",
        r"(?i)onclick=",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Validates and sanitizes a raw query.
///
/// # Errors
///
/// Returns [`GatewayError::Validation`] when the query is empty after
/// trimming, exceeds the length limit, or matches an injection pattern.
pub fn validate_query(raw: &str) -> Result<String, GatewayError> {
    if raw.chars().count() > MAX_QUERY_CHARS {
        return Err(GatewayError::Validation {
            message: format!("query exceeds {MAX_QUERY_CHARS} characters"),
        });
    }

    let sanitized = sanitize(raw);
    if sanitized.is_empty() {
        return Err(GatewayError::Validation {
            message: "query must not be empty".to_string(),
        });
    }

    if INJECTION_PATTERNS.iter().any(|re| re.is_match(&sanitized)) {
        return Err(GatewayError::Validation {
            message: "query contains a disallowed pattern".to_string(),
        });
    }

    Ok(sanitized)
}

/// Strips control characters and collapses whitespace runs to one space.
fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;
    for c in raw.chars() {
        if c.is_control() {
            continue;
        }
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_valid_query_sanitized() {
        let result = validate_query("  Jaké \t jsou\n kontraindikace?  ");
        assert_eq!(
            result.unwrap_or_default(),
            "Jaké jsou kontraindikace?"
        );
    }

    #[test]
    fn test_empty_rejected() {
        assert!(validate_query("").is_err());
        assert!(validate_query("   \t\n ").is_err());
    }

    #[test]
    fn test_over_length_rejected() {
        let long = "á".repeat(MAX_QUERY_CHARS + 1);
        assert!(validate_query(&long).is_err());

        let exactly = "a".repeat(MAX_QUERY_CHARS);
        assert!(validate_query(&exactly).is_ok());
    }

    #[test_case("1 UNION SELECT * FROM users"; "sql union")]
    #[test_case("x; drop   table pacienti"; "sql drop")]
    #[test_case("<SCRIPT>alert(1)</script>"; "script tag")]
    #[test_case("javascript:alert(1)"; "javascript url")]
    #[test_case("<img onclick=steal()>"; "onclick handler")]
    fn test_injection_rejected(query: &str) {
        assert!(validate_query(query).is_err());
    }

    #[test]
    fn test_control_characters_stripped() {
        let result = validate_query("otáz\u{0000}ka\u{0007}?");
        assert_eq!(result.unwrap_or_default(), "otázka?");
    }

    #[test]
    fn test_medical_question_passes() {
        assert!(validate_query("Jaké je dávkování metforminu u CKD?").is_ok());
    }
}
