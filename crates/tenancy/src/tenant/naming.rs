//! Tenant id to schema name mapping.

use regex::Regex;

use crate::config::SchemaConfig;
use crate::error::{ConfigurationError, SchemaError};

use super::id::{SchemaName, TenantId, escape_literal};

/// Derives schema names from tenant ids.
///
/// The mapping is a pure function of the tenant id:
///
/// 1. lowercase
/// 2. replace every character outside `[a-z0-9_-]` with `_`
/// 3. truncate so that prefix plus sanitized id fits `max_schema_length`
///
/// ```
/// use helios_tenancy::config::SchemaConfig;
/// use helios_tenancy::tenant::{SchemaNaming, TenantId};
///
/// let naming = SchemaNaming::new(&SchemaConfig::default()).unwrap();
/// let schema = naming.schema_for(&TenantId::new("Admin; DROP TABLE users;")).unwrap();
/// assert_eq!(schema.as_str(), "tenant_admin__drop_table_users_");
/// ```
#[derive(Debug, Clone)]
pub struct SchemaNaming {
    prefix: String,
    system_schema: SchemaName,
    max_length: usize,
    pattern: Regex,
}

impl SchemaNaming {
    /// Creates the naming scheme described by `config`.
    pub fn new(config: &SchemaConfig) -> Result<Self, ConfigurationError> {
        let pattern =
            Regex::new(&config.schema_pattern).map_err(|source| ConfigurationError::InvalidPattern {
                field: "schema.schema_pattern",
                source,
            })?;

        if config.schema_prefix.is_empty() || config.schema_prefix.len() >= config.max_schema_length
        {
            return Err(ConfigurationError::InvalidSchemaName {
                name: config.schema_prefix.clone(),
                reason: format!(
                    "prefix must be non-empty and shorter than {} characters",
                    config.max_schema_length
                ),
            });
        }

        if config.system_schema.is_empty()
            || config.system_schema.len() > config.max_schema_length
            || !pattern.is_match(&config.system_schema)
        {
            return Err(ConfigurationError::InvalidSchemaName {
                name: config.system_schema.clone(),
                reason: format!("does not match {}", config.schema_pattern),
            });
        }

        Ok(Self {
            prefix: config.schema_prefix.clone(),
            system_schema: SchemaName::new(config.system_schema.clone()),
            max_length: config.max_schema_length,
            pattern,
        })
    }

    /// Returns the tenant schema prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the system schema name.
    pub fn system_schema(&self) -> &SchemaName {
        &self.system_schema
    }

    /// Sanitizes a tenant id into a schema name component.
    pub fn sanitize(&self, id: &str) -> String {
        let budget = self.max_length - self.prefix.len();
        id.to_lowercase()
            .chars()
            .map(|c| match c {
                'a'..='z' | '0'..='9' | '_' | '-' => c,
                _ => '_',
            })
            .take(budget)
            .collect()
    }

    /// Returns the schema name owned by `tenant_id`.
    pub fn schema_for(&self, tenant_id: &TenantId) -> Result<SchemaName, SchemaError> {
        let sanitized = self.sanitize(tenant_id.as_str());
        if sanitized.is_empty() {
            return Err(SchemaError::InvalidTenantId {
                tenant_id: tenant_id.to_string(),
                reason: "sanitizes to an empty schema name".to_string(),
            });
        }

        let name = format!("{}{}", self.prefix, sanitized);
        if !self.pattern.is_match(&name) {
            return Err(SchemaError::InvalidTenantId {
                tenant_id: tenant_id.to_string(),
                reason: format!("schema name {} does not match the schema pattern", name),
            });
        }

        Ok(SchemaName::new(name))
    }

    /// Returns true if `schema` is in the tenant namespace.
    ///
    /// The comparison is case-insensitive, matching how an unquoted
    /// identifier folds in SQL.
    pub fn is_tenant_schema(&self, schema: &str) -> bool {
        let lowered = schema.to_lowercase();
        lowered.starts_with(&self.prefix) && lowered != self.system_schema.as_str()
    }

    /// The ownership marker stored on a tenant schema.
    pub fn owner_marker(&self, tenant_id: &TenantId) -> String {
        format!("tenant:{}", tenant_id)
    }

    /// Extracts the tenant id from an ownership marker.
    pub fn owner_from_marker<'a>(&self, marker: &'a str) -> Option<&'a str> {
        marker.strip_prefix("tenant:")
    }

    /// SQL literal form of the ownership marker.
    pub(crate) fn owner_marker_literal(&self, tenant_id: &TenantId) -> String {
        format!("'{}'", escape_literal(&self.owner_marker(tenant_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naming() -> SchemaNaming {
        SchemaNaming::new(&SchemaConfig::default()).unwrap()
    }

    #[test]
    fn test_schema_for_simple_id() {
        let schema = naming().schema_for(&TenantId::new("acme")).unwrap();
        assert_eq!(schema, "tenant_acme");
    }

    #[test]
    fn test_schema_for_injection_attempt() {
        let schema = naming()
            .schema_for(&TenantId::new("Admin; DROP TABLE users;"))
            .unwrap();
        assert_eq!(schema, "tenant_admin__drop_table_users_");
    }

    #[test]
    fn test_sanitize_keeps_hyphen_and_underscore() {
        assert_eq!(naming().sanitize("Acme-Corp_EU"), "acme-corp_eu");
    }

    #[test]
    fn test_sanitize_replaces_non_ascii() {
        assert_eq!(naming().sanitize("café/ü"), "caf___");
    }

    #[test]
    fn test_sanitize_is_length_bounded() {
        let long = "x".repeat(200);
        let schema = naming().schema_for(&TenantId::new(&long)).unwrap();
        assert_eq!(schema.as_str().len(), 63);
    }

    #[test]
    fn test_distinct_sanitized_ids_map_to_distinct_schemas() {
        let naming = naming();
        let ids = ["acme", "acme-eu", "acme_eu2", "beta", "b", "a.b", "tenant", "0"];
        let mut seen = std::collections::HashMap::new();
        for raw in ids {
            let id = TenantId::new(raw);
            let sanitized = naming.sanitize(id.as_str());
            let schema = naming.schema_for(&id).unwrap();
            if let Some(previous) = seen.insert(schema.clone(), sanitized.clone()) {
                assert_eq!(previous, sanitized, "distinct sanitized ids collided");
            }
        }
    }

    #[test]
    fn test_lossy_sanitization_can_collide() {
        let naming = naming();
        let a = naming.schema_for(&TenantId::new("a.b")).unwrap();
        let b = naming.schema_for(&TenantId::new("a b")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_custom_prefix_must_match_pattern() {
        let config = SchemaConfig::new().with_prefix("Org");
        let naming = SchemaNaming::new(&config).unwrap();
        assert!(matches!(
            naming.schema_for(&TenantId::new("acme")),
            Err(SchemaError::InvalidTenantId { .. })
        ));
    }

    #[test]
    fn test_invalid_system_schema_is_rejected() {
        let config = SchemaConfig::new().with_system_schema("Shared Data");
        assert!(matches!(
            SchemaNaming::new(&config),
            Err(ConfigurationError::InvalidSchemaName { .. })
        ));
    }

    #[test]
    fn test_is_tenant_schema() {
        let naming = naming();
        assert!(naming.is_tenant_schema("tenant_beta"));
        assert!(naming.is_tenant_schema("TENANT_BETA"));
        assert!(!naming.is_tenant_schema("shared"));
        assert!(!naming.is_tenant_schema("public"));
    }

    #[test]
    fn test_owner_marker_round_trip() {
        let naming = naming();
        let marker = naming.owner_marker(&TenantId::new("o'neil"));
        assert_eq!(marker, "tenant:o'neil");
        assert_eq!(naming.owner_from_marker(&marker), Some("o'neil"));
        assert_eq!(
            naming.owner_marker_literal(&TenantId::new("o'neil")),
            "'tenant:o''neil'"
        );
    }
}
