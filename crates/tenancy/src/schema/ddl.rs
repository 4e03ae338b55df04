//! SQL generation for schema provisioning.

use crate::config::{SchemaConfig, TableDefinition};
use crate::tenant::{SchemaName, SchemaNaming, TenantId, escape_literal, quote_identifier};

use super::record::SchemaStatus;

/// PostgreSQL identifier limit.
const MAX_IDENTIFIER_LENGTH: usize = 63;

const REGISTRY_TABLE: &str = "tenant_registry";
const EVENTS_TABLE: &str = "schema_events";

/// Generates provisioning DDL for one [`SchemaConfig`].
#[derive(Debug)]
pub(crate) struct SchemaDdl<'a> {
    config: &'a SchemaConfig,
    naming: &'a SchemaNaming,
}

impl<'a> SchemaDdl<'a> {
    pub(crate) fn new(config: &'a SchemaConfig, naming: &'a SchemaNaming) -> Self {
        Self { config, naming }
    }

    fn system(&self) -> &SchemaName {
        self.naming.system_schema()
    }

    fn has_system_table(&self, name: &str) -> bool {
        self.config.system_tables.iter().any(|t| t.name == name)
    }

    fn grantee(&self) -> String {
        match &self.config.service_role {
            Some(role) => quote_identifier(role),
            None => "CURRENT_USER".to_string(),
        }
    }

    /// Statements that create the system schema and its tables.
    ///
    /// Every statement is idempotent.
    pub(crate) fn system_bootstrap(&self) -> Vec<String> {
        let system = self.system();
        let mut statements = vec![format!("CREATE SCHEMA IF NOT EXISTS {}", system.quoted())];
        for table in &self.config.system_tables {
            statements.push(self.create_table(system, table, None));
            statements.extend(self.create_indexes(system, table));
        }
        statements
    }

    /// Statements that provision a tenant schema inside one transaction.
    ///
    /// The leading `CREATE SCHEMA` has no `IF NOT EXISTS`: when another
    /// session creates the same schema first, this transaction fails.
    pub(crate) fn tenant_provisioning(&self, tenant_id: &TenantId, schema: &SchemaName) -> Vec<String> {
        let mut statements = vec![
            format!("CREATE SCHEMA {}", schema.quoted()),
            format!(
                "COMMENT ON SCHEMA {} IS {}",
                schema.quoted(),
                self.naming.owner_marker_literal(tenant_id)
            ),
            // Unqualified names in column definitions resolve in the new schema.
            format!("SET LOCAL search_path TO {}", schema.quoted()),
        ];
        for table in &self.config.base_tables {
            statements.push(self.create_table(schema, table, Some(tenant_id)));
            statements.extend(self.create_indexes(schema, table));
        }
        statements.extend(self.grants(schema));
        statements.extend(self.register_tenant(tenant_id, schema, SchemaStatus::Ready));
        statements.extend(self.record_event(schema, "created"));
        statements
    }

    /// Statements that drop a tenant schema and record the drop.
    pub(crate) fn tenant_drop(&self, tenant_id: &TenantId, schema: &SchemaName) -> Vec<String> {
        let mut statements = vec![format!("DROP SCHEMA IF EXISTS {} CASCADE", schema.quoted())];
        if self.has_system_table(REGISTRY_TABLE) {
            statements.push(format!(
                "UPDATE {}.{} SET status = '{}' WHERE tenant_id = '{}'",
                self.system().quoted(),
                quote_identifier(REGISTRY_TABLE),
                SchemaStatus::Dropped,
                escape_literal(tenant_id.as_str())
            ));
        }
        statements.extend(self.record_event(schema, "dropped"));
        statements
    }

    /// `CREATE TABLE` for `table`, pinned to `tenant` when given.
    pub(crate) fn create_table(
        &self,
        schema: &SchemaName,
        table: &TableDefinition,
        tenant: Option<&TenantId>,
    ) -> String {
        let mut columns: Vec<String> = table.columns.clone();
        if let Some(tenant) = tenant {
            let literal = format!("'{}'", escape_literal(tenant.as_str()));
            columns.push(format!(
                "tenant_id TEXT NOT NULL DEFAULT {literal} CHECK (tenant_id = {literal})"
            ));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {}.{} (\n    {}\n)",
            schema.quoted(),
            quote_identifier(&table.name),
            columns.join(",\n    ")
        )
    }

    /// `CREATE INDEX` statements for `table`.
    pub(crate) fn create_indexes(&self, schema: &SchemaName, table: &TableDefinition) -> Vec<String> {
        table
            .indexes
            .iter()
            .map(|index| {
                let suffix = if index.unique { "key" } else { "idx" };
                let name = truncate_identifier(&format!(
                    "{}_{}_{}",
                    table.name,
                    index.columns.join("_"),
                    suffix
                ));
                let columns = index
                    .columns
                    .iter()
                    .map(|c| quote_identifier(c))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "CREATE {}INDEX IF NOT EXISTS {} ON {}.{} ({})",
                    if index.unique { "UNIQUE " } else { "" },
                    quote_identifier(&name),
                    schema.quoted(),
                    quote_identifier(&table.name),
                    columns
                )
            })
            .collect()
    }

    /// Grants on existing objects plus default privileges for future ones.
    pub(crate) fn grants(&self, schema: &SchemaName) -> Vec<String> {
        let schema = schema.quoted();
        let role = self.grantee();
        vec![
            format!("GRANT USAGE ON SCHEMA {schema} TO {role}"),
            format!(
                "GRANT SELECT, INSERT, UPDATE, DELETE ON ALL TABLES IN SCHEMA {schema} TO {role}"
            ),
            format!("GRANT USAGE, SELECT ON ALL SEQUENCES IN SCHEMA {schema} TO {role}"),
            format!(
                "ALTER DEFAULT PRIVILEGES IN SCHEMA {schema} GRANT SELECT, INSERT, UPDATE, DELETE ON TABLES TO {role}"
            ),
            format!(
                "ALTER DEFAULT PRIVILEGES IN SCHEMA {schema} GRANT USAGE, SELECT ON SEQUENCES TO {role}"
            ),
        ]
    }

    fn register_tenant(
        &self,
        tenant_id: &TenantId,
        schema: &SchemaName,
        status: SchemaStatus,
    ) -> Option<String> {
        self.has_system_table(REGISTRY_TABLE).then(|| format!(
            "INSERT INTO {}.{} (tenant_id, schema_name, status) VALUES ('{}', '{}', '{}') \
             ON CONFLICT (tenant_id) DO UPDATE SET schema_name = EXCLUDED.schema_name, status = EXCLUDED.status",
            self.system().quoted(),
            quote_identifier(REGISTRY_TABLE),
            escape_literal(tenant_id.as_str()),
            escape_literal(schema.as_str()),
            status
        ))
    }

    fn record_event(&self, schema: &SchemaName, event: &str) -> Option<String> {
        self.has_system_table(EVENTS_TABLE).then(|| {
            format!(
                "INSERT INTO {}.{} (schema_name, event) VALUES ('{}', '{}')",
                self.system().quoted(),
                quote_identifier(EVENTS_TABLE),
                escape_literal(schema.as_str()),
                escape_literal(event)
            )
        })
    }

    /// The session `search_path` for a tenant.
    pub(crate) fn tenant_search_path(&self, schema: &SchemaName) -> Vec<SchemaName> {
        let mut path = vec![schema.clone()];
        if self.config.search_path_includes_system {
            path.push(self.system().clone());
        }
        path.push(SchemaName::new("public"));
        path
    }

    /// The session `search_path` for system operations.
    pub(crate) fn system_search_path(&self) -> Vec<SchemaName> {
        vec![self.system().clone(), SchemaName::new("public")]
    }
}

fn truncate_identifier(name: &str) -> String {
    name.chars().take(MAX_IDENTIFIER_LENGTH).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (SchemaConfig, SchemaNaming) {
        let config = SchemaConfig::default();
        let naming = SchemaNaming::new(&config).unwrap();
        (config, naming)
    }

    #[test]
    fn test_tenant_table_is_pinned() {
        let (config, naming) = fixture();
        let ddl = SchemaDdl::new(&config, &naming);
        let sql = ddl.create_table(
            &SchemaName::new("tenant_acme"),
            &config.base_tables[0],
            Some(&TenantId::new("acme")),
        );
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"tenant_acme\".\"users\""));
        assert!(sql.contains("tenant_id TEXT NOT NULL DEFAULT 'acme' CHECK (tenant_id = 'acme')"));
    }

    #[test]
    fn test_system_table_is_not_pinned() {
        let (config, naming) = fixture();
        let ddl = SchemaDdl::new(&config, &naming);
        let sql = ddl.create_table(&SchemaName::new("shared"), &config.system_tables[1], None);
        assert!(!sql.contains("CHECK (tenant_id"));
    }

    #[test]
    fn test_index_names() {
        let (config, naming) = fixture();
        let ddl = SchemaDdl::new(&config, &naming);
        let orders = config.base_tables.iter().find(|t| t.name == "orders").unwrap();
        let sql = ddl.create_indexes(&SchemaName::new("tenant_acme"), orders);
        assert_eq!(
            sql[1],
            "CREATE INDEX IF NOT EXISTS \"orders_status_created_at_idx\" ON \"tenant_acme\".\"orders\" (\"status\", \"created_at\")"
        );
    }

    #[test]
    fn test_provisioning_order() {
        let (config, naming) = fixture();
        let ddl = SchemaDdl::new(&config, &naming);
        let statements =
            ddl.tenant_provisioning(&TenantId::new("acme"), &SchemaName::new("tenant_acme"));
        assert_eq!(statements[0], "CREATE SCHEMA \"tenant_acme\"");
        assert_eq!(
            statements[1],
            "COMMENT ON SCHEMA \"tenant_acme\" IS 'tenant:acme'"
        );
        assert!(statements.iter().any(|s| s.starts_with("ALTER DEFAULT PRIVILEGES")));
        assert!(statements.last().unwrap().contains("schema_events"));
    }

    #[test]
    fn test_grants_to_service_role() {
        let config = SchemaConfig::default().with_service_role("helios_app");
        let naming = SchemaNaming::new(&config).unwrap();
        let ddl = SchemaDdl::new(&config, &naming);
        let grants = ddl.grants(&SchemaName::new("tenant_acme"));
        assert_eq!(grants[0], "GRANT USAGE ON SCHEMA \"tenant_acme\" TO \"helios_app\"");
    }

    #[test]
    fn test_search_paths() {
        let (config, naming) = fixture();
        let ddl = SchemaDdl::new(&config, &naming);
        let path: Vec<_> = ddl
            .tenant_search_path(&SchemaName::new("tenant_acme"))
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(path, vec!["tenant_acme", "shared", "public"]);

        let mut config = SchemaConfig::default();
        config.search_path_includes_system = false;
        let ddl = SchemaDdl::new(&config, &naming);
        assert_eq!(ddl.tenant_search_path(&SchemaName::new("tenant_acme")).len(), 2);
    }

    #[test]
    fn test_literals_are_escaped() {
        let (config, naming) = fixture();
        let ddl = SchemaDdl::new(&config, &naming);
        let sql = ddl
            .record_event(&SchemaName::new("tenant_o'neil"), "created")
            .unwrap();
        assert!(sql.contains("'tenant_o''neil'"));
    }

    #[test]
    fn test_bookkeeping_follows_system_tables() {
        let mut config = SchemaConfig::default();
        config.system_tables.clear();
        let naming = SchemaNaming::new(&config).unwrap();
        let ddl = SchemaDdl::new(&config, &naming);
        let statements = ddl.tenant_drop(&TenantId::new("acme"), &SchemaName::new("tenant_acme"));
        assert_eq!(statements, vec!["DROP SCHEMA IF EXISTS \"tenant_acme\" CASCADE"]);
    }
}
