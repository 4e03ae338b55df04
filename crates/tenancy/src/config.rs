//! Configuration for the tenancy layer.
//!
//! All structs deserialize with serde and fill omitted fields with defaults,
//! so a partial document such as `{"schema": {"system_schema": "platform"}}`
//! is a complete configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audit::Severity;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenancyConfig {
    /// Tenant context resolution.
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Schema naming and provisioning.
    #[serde(default)]
    pub schema: SchemaConfig,

    /// Query isolation rules and advisory consult.
    #[serde(default)]
    pub validator: ValidatorConfig,
}

impl TenancyConfig {
    /// Validates the configuration, returning every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        errors.extend(self.resolver.problems());
        errors.extend(self.schema.problems());
        errors.extend(self.validator.problems());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration for the tenant context resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Headers carrying an explicit tenant id, checked in order.
    #[serde(default = "default_tenant_headers")]
    pub tenant_headers: Vec<String>,

    /// Platform base domain, e.g. `example.com`.
    ///
    /// When set, the first label of a host `acme.example.com` names the tenant.
    #[serde(default)]
    pub base_domain: Option<String>,

    /// Subdomain labels that never name a tenant.
    #[serde(default = "default_reserved_subdomains")]
    pub reserved_subdomains: Vec<String>,

    /// Path segment marking the API root; the segment before it names the tenant.
    #[serde(default = "default_api_marker")]
    pub api_marker: String,

    /// Path segments that never name a tenant.
    #[serde(default = "default_reserved_path_segments")]
    pub reserved_path_segments: Vec<String>,

    /// Maximum length of a raw tenant id, in characters.
    #[serde(default = "default_max_tenant_id_length")]
    pub max_tenant_id_length: usize,

    /// Internal components allowed to force a tenant or system context.
    #[serde(default)]
    pub trusted_callers: Vec<String>,
}

fn default_tenant_headers() -> Vec<String> {
    vec!["tenant-id".to_string(), "x-tenant-id".to_string()]
}

fn default_reserved_subdomains() -> Vec<String> {
    ["www", "api", "app", "admin", "mail"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_api_marker() -> String {
    "api".to_string()
}

fn default_reserved_path_segments() -> Vec<String> {
    ["api", "health", "metrics", "admin", "static", "system"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_max_tenant_id_length() -> usize {
    64
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            tenant_headers: default_tenant_headers(),
            base_domain: None,
            reserved_subdomains: default_reserved_subdomains(),
            api_marker: default_api_marker(),
            reserved_path_segments: default_reserved_path_segments(),
            max_tenant_id_length: default_max_tenant_id_length(),
            trusted_callers: Vec::new(),
        }
    }
}

impl ResolverConfig {
    /// Sets the platform base domain.
    pub fn with_base_domain(mut self, domain: impl Into<String>) -> Self {
        self.base_domain = Some(domain.into());
        self
    }

    /// Allows an internal component to force contexts.
    pub fn with_trusted_caller(mut self, caller: impl Into<String>) -> Self {
        self.trusted_callers.push(caller.into());
        self
    }

    fn problems(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.tenant_headers.iter().any(|h| h.trim().is_empty()) {
            errors.push("resolver.tenant_headers must not contain blank names".to_string());
        }
        if self.api_marker.trim().is_empty() || self.api_marker.contains('/') {
            errors.push("resolver.api_marker must be a single path segment".to_string());
        }
        if self.max_tenant_id_length == 0 {
            errors.push("resolver.max_tenant_id_length must be > 0".to_string());
        }
        if let Some(domain) = &self.base_domain {
            if domain.trim_matches('.').is_empty() {
                errors.push("resolver.base_domain must not be blank".to_string());
            }
        }
        errors
    }
}

/// Configuration for schema naming and provisioning.
///
/// # Example
///
/// ```
/// use helios_tenancy::config::SchemaConfig;
///
/// let config = SchemaConfig::new()
///     .with_prefix("org_")
///     .with_system_schema("platform")
///     .with_service_role("helios_app");
/// assert_eq!(config.schema_prefix, "org_");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Prefix for tenant schema names.
    ///
    /// The full schema name is `{prefix}{sanitized tenant id}`.
    #[serde(default = "default_schema_prefix")]
    pub schema_prefix: String,

    /// Name of the system schema holding platform tables.
    #[serde(default = "default_system_schema")]
    pub system_schema: String,

    /// Maximum schema name length (PostgreSQL limit is 63).
    #[serde(default = "default_max_schema_length")]
    pub max_schema_length: usize,

    /// Pattern every derived schema name must match.
    #[serde(default = "default_schema_pattern")]
    pub schema_pattern: String,

    /// Provision a missing tenant schema on first switch instead of failing.
    #[serde(default)]
    pub auto_create_schema: bool,

    /// Role granted privileges on tenant schemas. Defaults to the connecting role.
    #[serde(default)]
    pub service_role: Option<String>,

    /// Whether the tenant search path falls back to the system schema.
    #[serde(default = "default_true")]
    pub search_path_includes_system: bool,

    /// Tables created in every tenant schema.
    #[serde(default = "default_base_tables")]
    pub base_tables: Vec<TableDefinition>,

    /// Tables created in the system schema.
    #[serde(default = "default_system_tables")]
    pub system_tables: Vec<TableDefinition>,
}

fn default_schema_prefix() -> String {
    "tenant_".to_string()
}

fn default_system_schema() -> String {
    "shared".to_string()
}

fn default_max_schema_length() -> usize {
    63 // PostgreSQL identifier limit
}

fn default_schema_pattern() -> String {
    r"^[a-z_][a-z0-9_-]*$".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            schema_prefix: default_schema_prefix(),
            system_schema: default_system_schema(),
            max_schema_length: default_max_schema_length(),
            schema_pattern: default_schema_pattern(),
            auto_create_schema: false,
            service_role: None,
            search_path_includes_system: true,
            base_tables: default_base_tables(),
            system_tables: default_system_tables(),
        }
    }
}

impl SchemaConfig {
    /// Creates a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the schema prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.schema_prefix = prefix.into();
        self
    }

    /// Sets the system schema name.
    pub fn with_system_schema(mut self, schema: impl Into<String>) -> Self {
        self.system_schema = schema.into();
        self
    }

    /// Sets the role granted privileges on tenant schemas.
    pub fn with_service_role(mut self, role: impl Into<String>) -> Self {
        self.service_role = Some(role.into());
        self
    }

    /// Enables provisioning on first switch.
    pub fn with_auto_create(mut self) -> Self {
        self.auto_create_schema = true;
        self
    }

    /// Replaces the tenant base table catalog.
    pub fn with_base_tables(mut self, tables: Vec<TableDefinition>) -> Self {
        self.base_tables = tables;
        self
    }

    /// Names of the tables every tenant schema must contain.
    pub fn required_tenant_tables(&self) -> Vec<&str> {
        self.base_tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Names of the tables the system schema must contain.
    pub fn required_system_tables(&self) -> Vec<&str> {
        self.system_tables.iter().map(|t| t.name.as_str()).collect()
    }

    fn problems(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.schema_prefix.is_empty() {
            errors.push("schema.schema_prefix must not be empty".to_string());
        }
        if self.schema_prefix.len() >= self.max_schema_length {
            errors.push(format!(
                "schema.schema_prefix leaves no room within max_schema_length {}",
                self.max_schema_length
            ));
        }
        if self.system_schema.is_empty() {
            errors.push("schema.system_schema must not be empty".to_string());
        }
        if !self.schema_prefix.is_empty() && self.system_schema.starts_with(&self.schema_prefix) {
            errors.push("schema.system_schema must not start with the tenant prefix".to_string());
        }
        if let Err(e) = regex::Regex::new(&self.schema_pattern) {
            errors.push(format!("schema.schema_pattern is invalid: {}", e));
        }
        if self.base_tables.is_empty() {
            errors.push("schema.base_tables must define at least one table".to_string());
        }
        for table in self.base_tables.iter().chain(&self.system_tables) {
            if table.columns.is_empty() {
                errors.push(format!("table '{}' defines no columns", table.name));
            }
        }
        errors
    }
}

/// A table created during provisioning.
///
/// Tenant tables additionally receive a `tenant_id` column pinned to the
/// owning tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    /// Unqualified table name.
    pub name: String,

    /// Column definitions, e.g. `"email TEXT NOT NULL"`.
    pub columns: Vec<String>,

    /// Secondary indexes.
    #[serde(default)]
    pub indexes: Vec<IndexDefinition>,
}

impl TableDefinition {
    /// Creates a table definition.
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            indexes: Vec::new(),
        }
    }

    /// Adds a non-unique index over the given columns.
    pub fn with_index(mut self, columns: &[&str]) -> Self {
        self.indexes.push(IndexDefinition {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
        });
        self
    }

    /// Adds a unique index over the given columns.
    pub fn with_unique_index(mut self, columns: &[&str]) -> Self {
        self.indexes.push(IndexDefinition {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: true,
        });
        self
    }
}

/// A secondary index on a provisioned table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Indexed columns, in order.
    pub columns: Vec<String>,

    /// Whether the index enforces uniqueness.
    #[serde(default)]
    pub unique: bool,
}

fn default_base_tables() -> Vec<TableDefinition> {
    vec![
        TableDefinition::new(
            "users",
            &[
                "id BIGSERIAL PRIMARY KEY",
                "email TEXT NOT NULL",
                "display_name TEXT",
                "role TEXT NOT NULL DEFAULT 'member'",
                "created_at TIMESTAMPTZ NOT NULL DEFAULT now()",
            ],
        )
        .with_unique_index(&["email"]),
        TableDefinition::new(
            "customers",
            &[
                "id BIGSERIAL PRIMARY KEY",
                "name TEXT NOT NULL",
                "email TEXT",
                "created_at TIMESTAMPTZ NOT NULL DEFAULT now()",
            ],
        )
        .with_index(&["name"]),
        TableDefinition::new(
            "products",
            &[
                "id BIGSERIAL PRIMARY KEY",
                "sku TEXT NOT NULL",
                "name TEXT NOT NULL",
                "price_cents BIGINT NOT NULL DEFAULT 0",
            ],
        )
        .with_unique_index(&["sku"]),
        TableDefinition::new(
            "orders",
            &[
                "id BIGSERIAL PRIMARY KEY",
                "customer_id BIGINT NOT NULL REFERENCES customers(id)",
                "status TEXT NOT NULL DEFAULT 'open'",
                "total_cents BIGINT NOT NULL DEFAULT 0",
                "created_at TIMESTAMPTZ NOT NULL DEFAULT now()",
            ],
        )
        .with_index(&["customer_id"])
        .with_index(&["status", "created_at"]),
        TableDefinition::new(
            "settings",
            &["key TEXT PRIMARY KEY", "value JSONB NOT NULL"],
        ),
    ]
}

fn default_system_tables() -> Vec<TableDefinition> {
    vec![
        TableDefinition::new(
            "tenant_registry",
            &[
                "tenant_id TEXT PRIMARY KEY",
                "schema_name TEXT NOT NULL",
                "status TEXT NOT NULL",
                "created_at TIMESTAMPTZ NOT NULL DEFAULT now()",
            ],
        )
        .with_unique_index(&["schema_name"]),
        TableDefinition::new(
            "schema_events",
            &[
                "id BIGSERIAL PRIMARY KEY",
                "schema_name TEXT NOT NULL",
                "event TEXT NOT NULL",
                "occurred_at TIMESTAMPTZ NOT NULL DEFAULT now()",
            ],
        )
        .with_index(&["schema_name"]),
    ]
}

/// Configuration for the isolation validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Whether a configured advisory scorer is consulted.
    #[serde(default = "default_true")]
    pub advisory_enabled: bool,

    /// Upper bound on one advisory consult.
    #[serde(with = "humantime_serde", default = "default_advisory_timeout")]
    pub advisory_timeout: Duration,

    /// Advisory findings at or above this severity deny the query.
    #[serde(default = "default_advisory_deny_severity")]
    pub advisory_deny_severity: Severity,

    /// Audit severity for allows issued while the advisory was unavailable.
    #[serde(default = "default_advisory_failure_severity")]
    pub advisory_failure_severity: Severity,

    /// Queries longer than this are denied outright.
    #[serde(default = "default_max_query_length")]
    pub max_query_length: usize,

    /// Query text in audit events is truncated to this many characters.
    #[serde(default = "default_max_logged_query_length")]
    pub max_logged_query_length: usize,

    /// Schemas treated as reserved in addition to the built-in catalogs.
    #[serde(default)]
    pub reserved_schemas: Vec<String>,
}

fn default_advisory_timeout() -> Duration {
    Duration::from_millis(250)
}

fn default_advisory_deny_severity() -> Severity {
    Severity::High
}

fn default_advisory_failure_severity() -> Severity {
    Severity::High
}

fn default_max_query_length() -> usize {
    100_000
}

fn default_max_logged_query_length() -> usize {
    512
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            advisory_enabled: true,
            advisory_timeout: default_advisory_timeout(),
            advisory_deny_severity: default_advisory_deny_severity(),
            advisory_failure_severity: default_advisory_failure_severity(),
            max_query_length: default_max_query_length(),
            max_logged_query_length: default_max_logged_query_length(),
            reserved_schemas: Vec::new(),
        }
    }
}

impl ValidatorConfig {
    /// Sets the advisory timeout.
    pub fn with_advisory_timeout(mut self, timeout: Duration) -> Self {
        self.advisory_timeout = timeout;
        self
    }

    /// Disables the advisory consult.
    pub fn without_advisory(mut self) -> Self {
        self.advisory_enabled = false;
        self
    }

    fn problems(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.advisory_timeout.is_zero() {
            errors.push("validator.advisory_timeout must be > 0".to_string());
        }
        if self.advisory_timeout > Duration::from_secs(5) {
            errors.push("validator.advisory_timeout must not exceed 5s".to_string());
        }
        if self.max_query_length == 0 {
            errors.push("validator.max_query_length must be > 0".to_string());
        }
        if self.max_logged_query_length < 16 {
            errors.push("validator.max_logged_query_length must be >= 16".to_string());
        }
        errors
    }
}

/// Serde module for Duration with humantime format.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
