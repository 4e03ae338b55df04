//! Tenant identifier and schema name types.
//!
//! [`TenantId`] is the canonical identity of a tenant as resolved from a
//! request. [`SchemaName`] is the sanitized database namespace derived from
//! it by [`SchemaNaming`](super::SchemaNaming).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A canonical tenant identifier.
///
/// Identifiers are trimmed and lowercased on construction, so `"Acme"` and
/// `" acme "` name the same tenant. No other characters are altered: the raw
/// value may contain punctuation that only the schema name sanitizes away.
///
/// # Examples
///
/// ```
/// use helios_tenancy::tenant::TenantId;
///
/// let tenant = TenantId::new("  Acme ");
/// assert_eq!(tenant.as_str(), "acme");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Creates a tenant ID in canonical form.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().trim().to_lowercase())
    }

    /// Creates a tenant ID, rejecting blank or over-long input.
    ///
    /// `max_len` bounds the raw identifier in characters.
    pub fn parse(raw: &str, max_len: usize) -> Result<Self, TenantIdError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TenantIdError::Empty);
        }
        let len = trimmed.chars().count();
        if len > max_len {
            return Err(TenantIdError::TooLong { len, max: max_len });
        }
        if trimmed.chars().any(char::is_control) {
            return Err(TenantIdError::ControlCharacter);
        }
        Ok(Self::new(trimmed))
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Why a raw tenant identifier was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TenantIdError {
    /// Blank after trimming.
    #[error("tenant id is empty")]
    Empty,
    /// Longer than the configured bound.
    #[error("tenant id is {len} characters, maximum is {max}")]
    TooLong {
        /// Length of the trimmed id, in characters.
        len: usize,
        /// Configured maximum.
        max: usize,
    },
    /// Contains control characters.
    #[error("tenant id contains control characters")]
    ControlCharacter,
}

impl fmt::Debug for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TenantId({})", self.0)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TenantId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A sanitized schema name.
///
/// Only [`SchemaNaming`](super::SchemaNaming) produces tenant schema names,
/// so every value has passed sanitization and length bounding.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaName(String);

impl SchemaName {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the schema name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the name as a quoted SQL identifier.
    ///
    /// ```
    /// use helios_tenancy::config::SchemaConfig;
    /// use helios_tenancy::tenant::{SchemaNaming, TenantId};
    ///
    /// let naming = SchemaNaming::new(&SchemaConfig::default()).unwrap();
    /// let schema = naming.schema_for(&TenantId::new("acme")).unwrap();
    /// assert_eq!(schema.quoted(), "\"tenant_acme\"");
    /// ```
    pub fn quoted(&self) -> String {
        quote_identifier(&self.0)
    }
}

/// Quotes a SQL identifier, doubling embedded quotes.
pub(crate) fn quote_identifier(id: &str) -> String {
    format!("\"{}\"", id.replace('"', "\"\""))
}

/// Escapes a string for inclusion in a single-quoted SQL literal.
pub(crate) fn escape_literal(s: &str) -> String {
    s.replace('\'', "''")
}

impl fmt::Debug for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SchemaName({})", self.0)
    }
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for SchemaName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for SchemaName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for SchemaName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_id_is_canonical() {
        assert_eq!(TenantId::new("ACME").as_str(), "acme");
        assert_eq!(TenantId::new("  acme\t"), TenantId::new("Acme"));
    }

    #[test]
    fn test_tenant_id_keeps_punctuation() {
        let id = TenantId::new("Admin; DROP TABLE users;");
        assert_eq!(id.as_str(), "admin; drop table users;");
    }

    #[test]
    fn test_tenant_id_parse_rejects_blank() {
        assert_eq!(TenantId::parse("   ", 64), Err(TenantIdError::Empty));
    }

    #[test]
    fn test_tenant_id_parse_rejects_too_long() {
        let raw = "a".repeat(65);
        assert_eq!(
            TenantId::parse(&raw, 64),
            Err(TenantIdError::TooLong { len: 65, max: 64 })
        );
    }

    #[test]
    fn test_tenant_id_parse_rejects_control_characters() {
        assert_eq!(
            TenantId::parse("acme\u{0}", 64),
            Err(TenantIdError::ControlCharacter)
        );
    }

    #[test]
    fn test_tenant_id_error_messages() {
        assert_eq!(TenantIdError::Empty.to_string(), "tenant id is empty");
        assert_eq!(
            TenantIdError::TooLong { len: 65, max: 64 }.to_string(),
            "tenant id is 65 characters, maximum is 64"
        );
        let err: &dyn std::error::Error = &TenantIdError::ControlCharacter;
        assert_eq!(err.to_string(), "tenant id contains control characters");
    }

    #[test]
    fn test_tenant_id_debug_and_display() {
        let id = TenantId::new("acme");
        assert_eq!(format!("{:?}", id), "TenantId(acme)");
        assert_eq!(id.to_string(), "acme");
    }

    #[test]
    fn test_tenant_id_serde_transparent() {
        let id = TenantId::new("acme");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"acme\"");
    }

    #[test]
    fn test_quote_identifier_doubles_quotes() {
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(escape_literal("o'brien"), "o''brien");
    }

    #[test]
    fn test_schema_name_compares_with_str() {
        let schema = SchemaName::new("tenant_acme");
        assert_eq!(schema, "tenant_acme");
        assert_eq!(schema.quoted(), "\"tenant_acme\"");
    }
}
