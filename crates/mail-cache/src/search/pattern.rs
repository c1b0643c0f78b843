//! Sender patterns

use regex::Regex;
use std::fmt;

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid sender pattern {pattern:?}: {message}")]
pub struct InvalidPattern {
    pub pattern: String,
    pub message: String,
}

/// Compiled, unanchored regular expression matched against sender addresses
///
/// Construction is the only place a pattern is validated, so every store
/// query receives one that is known to compile.
#[derive(Clone)]
pub struct SenderPattern {
    regex: Regex,
}

impl SenderPattern {
    pub fn new(pattern: &str) -> Result<Self, InvalidPattern> {
        Regex::new(pattern)
            .map(|regex| Self { regex })
            .map_err(|e| InvalidPattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })
    }

    /// Whether `from_address` contains a match anywhere
    pub fn is_match(&self, from_address: &str) -> bool {
        self.regex.is_match(from_address)
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

impl fmt::Debug for SenderPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SenderPattern").field(&self.as_str()).finish()
    }
}

impl fmt::Display for SenderPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unanchored_match() {
        let pattern = SenderPattern::new("bob").unwrap();
        assert!(pattern.is_match("Bob Smith <bob@example.com>"));
        assert!(!pattern.is_match("alice@example.com"));
    }

    #[test]
    fn test_regex_syntax() {
        let pattern = SenderPattern::new(r"@(example|test)\.com>?$").unwrap();
        assert!(pattern.is_match("carol@test.com"));
        assert!(pattern.is_match("Carol <carol@example.com>"));
        assert!(!pattern.is_match("carol@example.org"));
    }

    #[test]
    fn test_case_sensitive_by_default() {
        let pattern = SenderPattern::new("BOB").unwrap();
        assert!(!pattern.is_match("bob@example.com"));

        let insensitive = SenderPattern::new("(?i)BOB").unwrap();
        assert!(insensitive.is_match("bob@example.com"));
    }

    #[test]
    fn test_unterminated_group_rejected() {
        let err = SenderPattern::new("(").unwrap_err();
        assert_eq!(err.pattern, "(");
        assert!(err.to_string().contains("invalid sender pattern"));
    }

    #[test]
    fn test_as_str_round_trips_source() {
        let pattern = SenderPattern::new("a.c").unwrap();
        assert_eq!(pattern.as_str(), "a.c");
        assert_eq!(pattern.to_string(), "a.c");
    }
}
