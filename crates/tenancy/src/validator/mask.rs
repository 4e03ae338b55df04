//! Redaction of query text for audit events.

use regex::Regex;

use crate::error::ConfigurationError;

/// Redacts credential-like fragments and truncates overlong text.
#[derive(Debug, Clone)]
pub struct QueryMasker {
    key_value: Regex,
    password_clause: Regex,
    max_len: usize,
}

const KEY_VALUE_PATTERN: &str = r#"(?i)\b(password|passwd|pwd|secret|client_secret|token|access_token|api[_-]?key|access[_-]?key|private[_-]?key|auth|authorization|credentials?)\b(\s*[=:]\s*)('(?:[^']|'')*'|"[^"]*"|[^\s,;)]+)"#;

const PASSWORD_CLAUSE_PATTERN: &str = r"(?i)\b(password)(\s+)('(?:[^']|'')*')";

impl QueryMasker {
    /// Creates a masker truncating to `max_len` characters.
    pub fn new(max_len: usize) -> Result<Self, ConfigurationError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|source| ConfigurationError::InvalidPattern {
                field: "validator.mask",
                source,
            })
        };
        Ok(Self {
            key_value: compile(KEY_VALUE_PATTERN)?,
            password_clause: compile(PASSWORD_CLAUSE_PATTERN)?,
            max_len,
        })
    }

    /// Returns `text` with credential values replaced by `***`, truncated.
    pub fn mask(&self, text: &str) -> String {
        let masked = self.key_value.replace_all(text, "$1$2***");
        let masked = self.password_clause.replace_all(&masked, "$1$2***");

        let total = masked.chars().count();
        if total <= self.max_len {
            return masked.into_owned();
        }

        let mut out: String = masked.chars().take(self.max_len).collect();
        out.push_str(&format!("...[truncated {} chars]", total - self.max_len));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn masker() -> QueryMasker {
        QueryMasker::new(64).unwrap()
    }

    #[test]
    fn test_masks_quoted_password() {
        assert_eq!(
            masker().mask("SELECT 1 FROM users WHERE password = 'hunter2'"),
            "SELECT 1 FROM users WHERE password = ***"
        );
    }

    #[test]
    fn test_masks_unquoted_key_value_pairs() {
        assert_eq!(
            masker().mask("token=abc123, api_key: XYZ"),
            "token=***, api_key: ***"
        );
    }

    #[test]
    fn test_masks_password_clause() {
        assert_eq!(
            masker().mask("ALTER ROLE app PASSWORD 'p''w'"),
            "ALTER ROLE app PASSWORD ***"
        );
    }

    #[test]
    fn test_leaves_lookalike_words() {
        assert_eq!(
            masker().mask("SELECT author = 'x' FROM books"),
            "SELECT author = 'x' FROM books"
        );
    }

    #[test]
    fn test_truncates_long_text() {
        let text = "a".repeat(100);
        let masked = masker().mask(&text);
        assert!(masked.starts_with(&"a".repeat(64)));
        assert!(masked.ends_with("...[truncated 36 chars]"));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let text = "é".repeat(70);
        let masked = masker().mask(&text);
        assert!(masked.starts_with(&"é".repeat(64)));
    }
}
