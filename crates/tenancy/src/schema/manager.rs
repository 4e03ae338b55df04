//! The schema lifecycle manager.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditCategory, AuditEvent, AuditTrail, Severity};
use crate::config::SchemaConfig;
use crate::error::{BackendError, ConfigurationError, SchemaError, TenancyResult};
use crate::store::{RelationalStore, StoreConnection};
use crate::tenant::{SchemaName, SchemaNaming, TenantId, TenantScope};

use super::ddl::SchemaDdl;
use super::record::{SchemaRecord, SchemaStatus};
use super::registry::SchemaRegistry;

/// Outcome of [`SchemaLifecycleManager::create_tenant_schema`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvisionResult {
    /// The cached record after provisioning.
    pub record: SchemaRecord,
    /// False when the schema already existed.
    pub created: bool,
}

/// Result of an integrity check against the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    /// Schema that was checked.
    pub schema: SchemaName,
    /// True when nothing is missing.
    pub valid: bool,
    /// Missing objects. Contains the schema itself when it does not exist.
    pub missing: Vec<String>,
}

/// Caller-level confirmation required by
/// [`SchemaLifecycleManager::drop_tenant_schema`].
///
/// Names the tenant whose schema is to be dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropConfirmation(TenantId);

impl DropConfirmation {
    /// Confirms dropping the schema of `tenant`.
    pub fn new(tenant: impl AsRef<str>) -> Self {
        Self(TenantId::new(tenant))
    }

    /// The confirmed tenant.
    pub fn tenant(&self) -> &TenantId {
        &self.0
    }

    fn confirms(&self, tenant_id: &TenantId) -> bool {
        &self.0 == tenant_id
    }
}

/// Creates, switches to, validates and drops tenant schemas.
///
/// The manager is the only writer of [`SchemaRecord`]s. Its registry is a
/// cache: integrity checks always query the store.
///
/// Provisioning and drop of one schema are serialized within a manager by a
/// per-schema lock. Across processes the database arbitrates: tenant
/// `CREATE SCHEMA` has no `IF NOT EXISTS`, so the losing transaction rolls
/// back and the call reports the schema as already provisioned.
pub struct SchemaLifecycleManager<S: RelationalStore> {
    store: Arc<S>,
    config: SchemaConfig,
    naming: SchemaNaming,
    registry: Arc<dyn SchemaRegistry>,
    audit: AuditTrail,
    locks: Mutex<HashMap<SchemaName, Arc<tokio::sync::Mutex<()>>>>,
    system_ready: AtomicBool,
}

impl<S: RelationalStore> fmt::Debug for SchemaLifecycleManager<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaLifecycleManager")
            .field("store", &self.store.name())
            .field("system_schema", self.naming.system_schema())
            .field("system_ready", &self.is_system_ready())
            .finish_non_exhaustive()
    }
}

impl<S: RelationalStore> SchemaLifecycleManager<S> {
    /// Creates a manager over `store`.
    pub fn new(
        store: Arc<S>,
        config: SchemaConfig,
        registry: Arc<dyn SchemaRegistry>,
        audit: AuditTrail,
    ) -> Result<Self, ConfigurationError> {
        let naming = SchemaNaming::new(&config)?;
        Ok(Self {
            store,
            config,
            naming,
            registry,
            audit,
            locks: Mutex::new(HashMap::new()),
            system_ready: AtomicBool::new(false),
        })
    }

    /// Returns the store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SchemaConfig {
        &self.config
    }

    /// Returns the naming scheme.
    pub fn naming(&self) -> &SchemaNaming {
        &self.naming
    }

    /// Returns the record cache.
    pub fn registry(&self) -> &Arc<dyn SchemaRegistry> {
        &self.registry
    }

    /// Returns true once the system schema passed validation in this process.
    pub fn is_system_ready(&self) -> bool {
        self.system_ready.load(Ordering::Acquire)
    }

    /// Returns the schema owned by `tenant_id`.
    pub fn schema_for(&self, tenant_id: &TenantId) -> Result<SchemaName, SchemaError> {
        self.naming.schema_for(tenant_id)
    }

    /// Returns the cached record for `tenant_id`, if any.
    pub fn record(&self, tenant_id: &TenantId) -> Option<SchemaRecord> {
        let schema = self.naming.schema_for(tenant_id).ok()?;
        self.registry
            .get(&schema)
            .filter(|r| &r.tenant_id == tenant_id)
    }

    fn ddl(&self) -> SchemaDdl<'_> {
        SchemaDdl::new(&self.config, &self.naming)
    }

    fn schema_lock(&self, schema: &SchemaName) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(schema.clone())
            .or_default()
            .clone()
    }

    // ========================================================================
    // System schema
    // ========================================================================

    /// Creates the system schema and its tables, then validates them.
    ///
    /// Idempotent. An incomplete system schema is a [`ConfigurationError`]
    /// and should stop the process.
    pub async fn ensure_system_schema(&self) -> TenancyResult<IntegrityReport> {
        let mut conn = self.store.acquire().await?;
        self.bootstrap_system_on(&mut conn).await
    }

    async fn bootstrap_system_on(&self, conn: &mut S::Connection) -> TenancyResult<IntegrityReport> {
        let system = self.naming.system_schema().clone();
        let statements = self.ddl().system_bootstrap();

        match run_transaction(conn, &statements).await {
            // Concurrent bootstraps can race on the catalog even with IF NOT EXISTS.
            Err(BackendError::AlreadyExists { object }) => {
                debug!(schema = %system, object = %object, "Concurrent bootstrap, retrying");
                if conn.is_discarded() {
                    *conn = self.store.acquire().await?;
                }
                run_transaction(conn, &statements).await?;
            }
            result => result?,
        }

        let required = self.config.required_system_tables();
        let report = check_integrity(conn, &system, &required).await?;
        if !report.valid {
            return Err(self.system_schema_incomplete(report).into());
        }

        self.system_ready.store(true, Ordering::Release);
        info!(schema = %system, tables = required.len(), "System schema ready");
        Ok(report)
    }

    async fn ensure_system_ready_on(&self, conn: &mut S::Connection) -> TenancyResult<()> {
        if !self.is_system_ready() {
            self.bootstrap_system_on(conn).await?;
        }
        Ok(())
    }

    fn system_schema_incomplete(&self, report: IntegrityReport) -> ConfigurationError {
        self.system_ready.store(false, Ordering::Release);
        error!(
            schema = %report.schema,
            missing = ?report.missing,
            "System schema failed integrity validation"
        );
        self.audit.log_system_event(
            "system_schema_incomplete",
            Severity::Critical,
            json!({ "schema": report.schema.as_str(), "missing": report.missing }),
        );
        ConfigurationError::SystemSchemaIncomplete {
            schema: report.schema,
            missing: report.missing,
        }
    }

    // ========================================================================
    // Tenant schemas
    // ========================================================================

    /// Provisions the schema of `tenant_id` in one transaction.
    ///
    /// Idempotent: an existing schema owned by the tenant is a no-op with
    /// `created: false`. Any failing step rolls the whole creation back.
    pub async fn create_tenant_schema(&self, tenant_id: &TenantId) -> TenancyResult<ProvisionResult> {
        let schema = self.naming.schema_for(tenant_id)?;
        let mut conn = self.store.acquire().await?;
        self.provision_on(&mut conn, tenant_id, schema).await
    }

    /// Provisions on a connection the caller already holds. The per-schema
    /// lock is only taken while holding a connection, so a creator never
    /// waits on the pool while holding the lock.
    async fn provision_on(
        &self,
        conn: &mut S::Connection,
        tenant_id: &TenantId,
        schema: SchemaName,
    ) -> TenancyResult<ProvisionResult> {
        let lock = self.schema_lock(&schema);
        let _guard = lock.lock().await;

        self.ensure_system_ready_on(conn).await?;

        if conn.schema_exists(&schema).await? {
            self.verify_owner(conn, tenant_id, &schema).await?;
            let record = self.record_status(tenant_id, &schema, SchemaStatus::Ready)?;
            debug!(tenant_id = %tenant_id, schema = %schema, "Tenant schema already provisioned");
            return Ok(ProvisionResult {
                record,
                created: false,
            });
        }

        self.registry
            .upsert(SchemaRecord::pending(tenant_id.clone(), schema.clone()));
        let statements = self.ddl().tenant_provisioning(tenant_id, &schema);

        match run_transaction(conn, &statements).await {
            Ok(()) => {
                let record = self.record_status(tenant_id, &schema, SchemaStatus::Ready)?;
                info!(tenant_id = %tenant_id, schema = %schema, "Tenant schema provisioned");
                self.audit.record(
                    AuditEvent::new(AuditCategory::Business, "schema_created", Severity::Info)
                        .with_tenant(Some(tenant_id))
                        .with_detail("schema", schema.as_str())
                        .with_detail("tables", record.tables.len()),
                );
                Ok(ProvisionResult {
                    record,
                    created: true,
                })
            }
            Err(BackendError::AlreadyExists { .. }) => {
                debug!(
                    tenant_id = %tenant_id,
                    schema = %schema,
                    "Schema created by a concurrent session"
                );
                if conn.is_discarded() {
                    *conn = self.store.acquire().await?;
                }
                if let Err(e) = self.verify_owner(conn, tenant_id, &schema).await {
                    self.registry.remove(&schema);
                    return Err(e);
                }
                let record = self.record_status(tenant_id, &schema, SchemaStatus::Ready)?;
                Ok(ProvisionResult {
                    record,
                    created: false,
                })
            }
            Err(source) => {
                self.record_status(tenant_id, &schema, SchemaStatus::Failed)?;
                error!(
                    tenant_id = %tenant_id,
                    schema = %schema,
                    error = %source,
                    "Tenant schema provisioning failed and was rolled back"
                );
                self.audit.record(
                    AuditEvent::new(AuditCategory::System, "schema_provision_failed", Severity::High)
                        .with_tenant(Some(tenant_id))
                        .with_detail("schema", schema.as_str())
                        .with_detail("error", source.to_string()),
                );
                Err(SchemaError::CreationFailed {
                    tenant_id: tenant_id.clone(),
                    schema,
                    source,
                }
                .into())
            }
        }
    }

    /// Scopes unqualified names on `conn` to the schema of `tenant_id`.
    ///
    /// The binding lives on the session and must be applied to every
    /// connection the tenant's work runs on. A schema not yet known to the
    /// cache is checked against the store, and provisioned when
    /// `auto_create_schema` is set.
    pub async fn switch_to_tenant_schema(
        &self,
        tenant_id: &TenantId,
        conn: &mut S::Connection,
    ) -> TenancyResult<SchemaName> {
        let schema = self.naming.schema_for(tenant_id)?;
        let cached = self
            .registry
            .get(&schema)
            .is_some_and(|r| r.is_ready() && &r.tenant_id == tenant_id);

        if !cached {
            if conn.schema_exists(&schema).await? {
                self.verify_owner(conn, tenant_id, &schema).await?;
                self.record_status(tenant_id, &schema, SchemaStatus::Ready)?;
            } else if self.config.auto_create_schema {
                info!(tenant_id = %tenant_id, schema = %schema, "Provisioning tenant schema on first use");
                self.provision_on(conn, tenant_id, schema.clone()).await?;
            } else {
                debug!(tenant_id = %tenant_id, schema = %schema, "Tenant schema not provisioned");
                return Err(SchemaError::NotFound {
                    tenant_id: tenant_id.clone(),
                    schema,
                }
                .into());
            }
        }

        conn.set_search_path(&self.ddl().tenant_search_path(&schema))
            .await?;
        debug!(tenant_id = %tenant_id, schema = %schema, "Switched search_path");
        Ok(schema)
    }

    /// Scopes unqualified names on `conn` to the system schema.
    pub async fn switch_to_system_schema(&self, conn: &mut S::Connection) -> TenancyResult<()> {
        conn.set_search_path(&self.ddl().system_search_path())
            .await?;
        Ok(())
    }

    /// Drops the schema of `tenant_id` and everything in it.
    ///
    /// Returns false when there was nothing to drop. The cached record is
    /// invalidated either way.
    pub async fn drop_tenant_schema(
        &self,
        tenant_id: &TenantId,
        confirmation: &DropConfirmation,
    ) -> TenancyResult<bool> {
        let schema = self.naming.schema_for(tenant_id)?;
        if !confirmation.confirms(tenant_id) {
            warn!(tenant_id = %tenant_id, schema = %schema, "Drop confirmation mismatch");
            self.audit.record(
                AuditEvent::new(AuditCategory::Security, "schema_drop_rejected", Severity::Medium)
                    .with_tenant(Some(tenant_id))
                    .with_detail("schema", schema.as_str())
                    .with_detail("confirmed", confirmation.tenant().as_str()),
            );
            return Err(SchemaError::ConfirmationMismatch {
                schema,
                confirmed: confirmation.tenant().to_string(),
            }
            .into());
        }

        let mut conn = self.store.acquire().await?;
        let lock = self.schema_lock(&schema);
        let _guard = lock.lock().await;

        self.ensure_system_ready_on(&mut conn).await?;

        if !conn.schema_exists(&schema).await? {
            self.registry.remove(&schema);
            debug!(tenant_id = %tenant_id, schema = %schema, "No schema to drop");
            return Ok(false);
        }

        self.verify_owner(&mut conn, tenant_id, &schema).await?;
        run_transaction(&mut conn, &self.ddl().tenant_drop(tenant_id, &schema)).await?;

        if !self.registry.set_status(&schema, SchemaStatus::Dropped) {
            self.registry.remove(&schema);
        }
        warn!(tenant_id = %tenant_id, schema = %schema, "Tenant schema dropped");
        self.audit.record(
            AuditEvent::new(AuditCategory::Security, "schema_dropped", Severity::Medium)
                .with_tenant(Some(tenant_id))
                .with_detail("schema", schema.as_str()),
        );
        Ok(true)
    }

    /// Re-checks that a schema and its required tables exist.
    ///
    /// For [`TenantScope::System`] a failed check is a
    /// [`ConfigurationError`]. For a tenant it is logged, audited and
    /// returned as an invalid report; the cached record moves to `FAILED`.
    pub async fn validate_integrity(&self, scope: &TenantScope) -> TenancyResult<IntegrityReport> {
        let mut conn = self.store.acquire().await?;
        match scope {
            TenantScope::System => {
                let system = self.naming.system_schema();
                let required = self.config.required_system_tables();
                let report = check_integrity(&mut conn, system, &required).await?;
                if !report.valid {
                    return Err(self.system_schema_incomplete(report).into());
                }
                Ok(report)
            }
            TenantScope::Tenant(tenant_id) => {
                let schema = self.naming.schema_for(tenant_id)?;
                let required = self.config.required_tenant_tables();
                let report = check_integrity(&mut conn, &schema, &required).await?;
                if !report.valid {
                    warn!(
                        tenant_id = %tenant_id,
                        schema = %schema,
                        missing = ?report.missing,
                        "Tenant schema failed integrity validation"
                    );
                    self.audit.record(
                        AuditEvent::new(
                            AuditCategory::System,
                            "schema_integrity_failed",
                            Severity::High,
                        )
                        .with_tenant(Some(tenant_id))
                        .with_detail("schema", schema.as_str())
                        .with_detail("missing", report.missing.clone()),
                    );
                    self.registry.set_status(&schema, SchemaStatus::Failed);
                }
                Ok(report)
            }
        }
    }

    /// Lists tenant schemas present in the store.
    pub async fn list_tenant_schemas(&self) -> TenancyResult<Vec<SchemaName>> {
        let mut conn = self.store.acquire().await?;
        let schemas = conn.list_schemas(self.naming.prefix()).await?;
        Ok(schemas
            .into_iter()
            .filter(|s| self.naming.is_tenant_schema(s))
            .map(SchemaName::new)
            .collect())
    }

    // ========================================================================
    // Helper Functions
    // ========================================================================

    /// Fails unless the ownership marker on `schema` names `tenant_id`.
    ///
    /// An unmarked schema is treated as owned by someone else.
    async fn verify_owner(
        &self,
        conn: &mut S::Connection,
        tenant_id: &TenantId,
        schema: &SchemaName,
    ) -> TenancyResult<()> {
        let comment = conn.schema_comment(schema).await?;
        let owner = comment
            .as_deref()
            .and_then(|c| self.naming.owner_from_marker(c));
        if owner == Some(tenant_id.as_str()) {
            return Ok(());
        }

        let owner = owner.unwrap_or("<unmarked>").to_string();
        warn!(
            tenant_id = %tenant_id,
            schema = %schema,
            owner = %owner,
            "Schema name collision"
        );
        self.audit.record(
            AuditEvent::new(AuditCategory::Security, "schema_collision", Severity::High)
                .with_tenant(Some(tenant_id))
                .with_detail("schema", schema.as_str())
                .with_detail("owner", owner.clone()),
        );
        Err(SchemaError::Collision {
            schema: schema.clone(),
            requested: tenant_id.clone(),
            owner,
        }
        .into())
    }

    /// Moves the cached record to `status`, starting a fresh record when the
    /// cached one belongs to another tenant or cannot make the move.
    fn record_status(
        &self,
        tenant_id: &TenantId,
        schema: &SchemaName,
        status: SchemaStatus,
    ) -> TenancyResult<SchemaRecord> {
        let mut record = match self.registry.get(schema) {
            Some(r)
                if &r.tenant_id == tenant_id
                    && (r.status == status || r.status.can_transition(status)) =>
            {
                r
            }
            _ => SchemaRecord::pending(tenant_id.clone(), schema.clone()),
        };
        if record.status != status {
            record.transition(status)?;
        }
        if status == SchemaStatus::Ready {
            record = record.with_tables(self.config.required_tenant_tables());
        }
        self.registry.upsert(record.clone());
        Ok(record)
    }
}

/// Runs `statements` in one transaction, rolling back on the first failure.
///
/// A connection whose rollback fails is discarded.
async fn run_transaction<C: StoreConnection>(
    conn: &mut C,
    statements: &[String],
) -> Result<(), BackendError> {
    conn.begin().await?;

    let mut result = Ok(());
    for sql in statements {
        if let Err(e) = conn.execute(sql).await {
            result = Err(e);
            break;
        }
    }
    if result.is_ok() {
        result = conn.commit().await;
    }

    if let Err(e) = result {
        if let Err(rollback) = conn.rollback().await {
            warn!(error = %rollback, "Rollback failed, discarding connection");
            conn.discard();
        }
        return Err(e);
    }
    Ok(())
}

async fn check_integrity<C: StoreConnection>(
    conn: &mut C,
    schema: &SchemaName,
    tables: &[&str],
) -> Result<IntegrityReport, BackendError> {
    let missing = if conn.schema_exists(schema).await? {
        conn.missing_tables(schema, tables).await?
    } else {
        std::iter::once(schema.to_string())
            .chain(tables.iter().map(|t| t.to_string()))
            .collect()
    };
    Ok(IntegrityReport {
        schema: schema.clone(),
        valid: missing.is_empty(),
        missing,
    })
}
