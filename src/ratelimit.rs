/// Failure classification for assistant errors.
///
/// Maps captured error text to `Transient` (worth retrying after a pause)
/// or `Fatal`. Transient signatures look like:
/// - JSON: `"error":"rate_limit"` or `"error": "rate_limit"`
/// - Text: `rate limit`, `usage limit`, `hit your limit`, `too many requests`,
///   `overloaded`, HTTP `429` (case-insensitive)
use regex::Regex;
use std::sync::LazyLock;

/// How much of the error text is inspected and logged.
pub const ERROR_EXCERPT_CHARS: usize = 200;

/// Compiled regex patterns for rate limit detection.
static RATE_LIMIT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r#""error"\s*:\s*"rate_limit""#).unwrap(),
        Regex::new(r"(?i)rate[ _-]?limit").unwrap(),
        Regex::new(r"(?i)usage limit").unwrap(),
        Regex::new(r"(?i)hit your limit").unwrap(),
        Regex::new(r"(?i)too many requests").unwrap(),
        Regex::new(r"(?i)overloaded").unwrap(),
        Regex::new(r"\b429\b").unwrap(),
    ]
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Fatal,
}

/// The leading part of an error text, cut on a char boundary.
pub fn excerpt(text: &str) -> &str {
    match text.char_indices().nth(ERROR_EXCERPT_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Classify captured error text. Only the excerpt is inspected.
pub fn classify(text: &str) -> FailureClass {
    if detect_rate_limit_in_text(excerpt(text)) {
        FailureClass::Transient
    } else {
        FailureClass::Fatal
    }
}

/// Check text content for rate limit patterns.
fn detect_rate_limit_in_text(text: &str) -> bool {
    for pattern in RATE_LIMIT_PATTERNS.iter() {
        if pattern.is_match(text) {
            tracing::debug!(pattern = %pattern, "rate limit pattern matched");
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_json_error_rate_limit() {
        assert_eq!(
            classify(r#"{"error":"rate_limit","message":"too many requests"}"#),
            FailureClass::Transient
        );
    }

    #[test]
    fn test_detect_json_error_rate_limit_with_spaces() {
        assert_eq!(
            classify(r#"{"error" : "rate_limit"}"#),
            FailureClass::Transient
        );
    }

    #[test]
    fn test_detect_rate_limit_phrase_case_insensitive() {
        assert_eq!(classify("Error: Rate Limit exceeded"), FailureClass::Transient);
        assert_eq!(classify("rate-limited, slow down"), FailureClass::Transient);
    }

    #[test]
    fn test_detect_usage_limit() {
        assert_eq!(
            classify("You have exceeded your usage limit for this model."),
            FailureClass::Transient
        );
    }

    #[test]
    fn test_detect_hit_your_limit() {
        assert_eq!(classify("HIT YOUR LIMIT"), FailureClass::Transient);
    }

    #[test]
    fn test_detect_http_429() {
        assert_eq!(classify("API Error: 429 Too Many Requests"), FailureClass::Transient);
        assert_eq!(classify("request id 14290 failed"), FailureClass::Fatal);
    }

    #[test]
    fn test_detect_overloaded() {
        assert_eq!(classify("overloaded_error: try again"), FailureClass::Transient);
    }

    #[test]
    fn test_other_errors_are_fatal() {
        assert_eq!(classify("Invalid API key"), FailureClass::Fatal);
        assert_eq!(classify(""), FailureClass::Fatal);
    }

    #[test]
    fn test_signature_past_excerpt_is_ignored() {
        let text = format!("{}rate limit", "x".repeat(ERROR_EXCERPT_CHARS));
        assert_eq!(classify(&text), FailureClass::Fatal);
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        let text = "é".repeat(300);
        assert_eq!(excerpt(&text).chars().count(), ERROR_EXCERPT_CHARS);
        assert_eq!(excerpt("short"), "short");
    }

    #[test]
    fn test_multiline_detection() {
        let text = "line 1: normal\nline 2: usage limit reached\nline 3: normal";
        assert_eq!(classify(text), FailureClass::Transient);
    }
}
