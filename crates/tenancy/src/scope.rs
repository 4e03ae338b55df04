//! Tenant-scoped execution.
//!
//! [`ScopedExecutor::run_scoped`] runs one query for one [`TenantContext`]:
//! it binds the connection's `search_path` to the tenant schema, validates
//! the query, executes it and resets the `search_path` before the connection
//! can be reused.
//!
//! The reset happens on every exit path. Errors reset through
//! [`ExecutionScope::close`]; a scope dropped without `close` (cancelled
//! future, panic) discards its connection instead, so a session carrying a
//! tenant scope never goes back to the pool.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error, instrument, warn};

use crate::audit::{AuditCategory, AuditEvent, AuditTrail, Severity};
use crate::error::{BackendError, IsolationViolation, TenancyResult};
use crate::schema::SchemaLifecycleManager;
use crate::store::{QueryResult, RelationalStore, StoreConnection};
use crate::tenant::{TenantContext, TenantScope};
use crate::validator::{IsolationValidator, ReasonCode};

/// A query handed to [`ScopedExecutor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopedQuery<'a> {
    /// Statement text, run as-is after validation.
    pub sql: &'a str,
    /// Marks a platform operation; only system contexts may run these.
    pub system: bool,
}

impl<'a> ScopedQuery<'a> {
    /// A tenant query.
    pub fn tenant(sql: &'a str) -> Self {
        Self { sql, system: false }
    }

    /// A system operation.
    pub fn system(sql: &'a str) -> Self {
        Self { sql, system: true }
    }
}

/// Guard over a connection whose `search_path` may carry a tenant scope.
///
/// Call [`close`](Self::close) to reset the scope. Dropping an unclosed
/// guard discards the connection.
pub struct ExecutionScope<'c, C: StoreConnection> {
    conn: &'c mut C,
    correlation_id: String,
    closed: bool,
}

impl<'c, C: StoreConnection> ExecutionScope<'c, C> {
    /// Opens a scope over `conn` for `ctx`.
    pub fn enter(conn: &'c mut C, ctx: &TenantContext) -> Self {
        Self {
            conn,
            correlation_id: ctx.correlation_id().to_string(),
            closed: false,
        }
    }

    /// The scoped connection.
    pub fn conn(&mut self) -> &mut C {
        &mut *self.conn
    }

    /// Resets the `search_path` to the session default.
    ///
    /// When the reset fails the connection is discarded and the error
    /// returned.
    pub async fn close(mut self) -> Result<(), BackendError> {
        self.closed = true;
        if self.conn.is_discarded() {
            return Ok(());
        }
        match self.conn.reset_search_path().await {
            Ok(()) => {
                debug!(correlation_id = %self.correlation_id, "Scope reset");
                Ok(())
            }
            Err(e) => {
                error!(
                    correlation_id = %self.correlation_id,
                    error = %e,
                    "Scope reset failed, discarding connection"
                );
                self.conn.discard();
                Err(e)
            }
        }
    }
}

impl<C: StoreConnection> Drop for ExecutionScope<'_, C> {
    fn drop(&mut self) {
        if !self.closed && !self.conn.is_discarded() {
            warn!(
                correlation_id = %self.correlation_id,
                "Scope dropped before reset, discarding connection"
            );
            self.conn.discard();
        }
    }
}

/// Runs queries inside a tenant scope.
pub struct ScopedExecutor<S: RelationalStore> {
    schemas: Arc<SchemaLifecycleManager<S>>,
    validator: Arc<IsolationValidator>,
    audit: AuditTrail,
}

impl<S: RelationalStore> std::fmt::Debug for ScopedExecutor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedExecutor")
            .field("schemas", &self.schemas)
            .field("validator", &self.validator)
            .finish_non_exhaustive()
    }
}

impl<S: RelationalStore> ScopedExecutor<S> {
    /// Creates an executor.
    pub fn new(
        schemas: Arc<SchemaLifecycleManager<S>>,
        validator: Arc<IsolationValidator>,
        audit: AuditTrail,
    ) -> Self {
        Self {
            schemas,
            validator,
            audit,
        }
    }

    /// Returns the lifecycle manager.
    pub fn schemas(&self) -> &Arc<SchemaLifecycleManager<S>> {
        &self.schemas
    }

    /// Returns the validator.
    pub fn validator(&self) -> &Arc<IsolationValidator> {
        &self.validator
    }

    /// Runs `query` for `ctx` on a connection acquired from the store.
    pub async fn run_scoped(
        &self,
        ctx: &TenantContext,
        query: ScopedQuery<'_>,
    ) -> TenancyResult<QueryResult> {
        let mut conn = self.schemas.store().acquire().await?;
        self.run_scoped_on(ctx, &mut conn, query).await
    }

    /// Runs `query` for `ctx` on a borrowed connection.
    ///
    /// On return the connection's `search_path` is back at its default, or
    /// the connection has been discarded.
    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id(), system = query.system))]
    pub async fn run_scoped_on(
        &self,
        ctx: &TenantContext,
        conn: &mut S::Connection,
        query: ScopedQuery<'_>,
    ) -> TenancyResult<QueryResult> {
        let mut scope = ExecutionScope::enter(conn, ctx);
        let result = self.run_in_scope(ctx, &mut scope, query).await;

        if let Err(e) = scope.close().await {
            // The connection is gone; the result, if any, is still valid.
            self.audit.record(
                AuditEvent::new(AuditCategory::System, "scope_reset_failed", Severity::High)
                    .for_context(ctx)
                    .with_detail("error", e.to_string()),
            );
        }
        result
    }

    async fn run_in_scope(
        &self,
        ctx: &TenantContext,
        scope: &mut ExecutionScope<'_, S::Connection>,
        query: ScopedQuery<'_>,
    ) -> TenancyResult<QueryResult> {
        if query.system && !ctx.is_system() {
            warn!(tenant_id = ?ctx.tenant_id(), "Tenant context attempted a system operation");
            self.audit.log_security_event(
                "privileged_query_rejected",
                Severity::High,
                json!({
                    "tenant_id": ctx.tenant_id(),
                    "correlation_id": ctx.correlation_id(),
                    "query": self.validator.masker().mask(query.sql),
                }),
            );
            return Err(IsolationViolation::new(ReasonCode::PrivilegedOperation, Severity::High)
                .with_rule("scope.system_query")
                .with_tenant(ctx.tenant_id().cloned())
                .into());
        }

        if let TenantScope::Tenant(tenant_id) = ctx.scope() {
            self.schemas
                .switch_to_tenant_schema(tenant_id, scope.conn())
                .await?;
        }

        self.validator.check(query.sql, ctx, query.system).await?;
        let rows = scope.conn().query(query.sql).await?;
        debug!(rows = rows.rows.len(), "Scoped query completed");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::tenant::SchemaName;

    #[tokio::test]
    async fn test_close_resets_search_path() {
        let store = InMemoryStore::new();
        let mut conn = store.acquire().await.unwrap();
        conn.set_search_path(&[SchemaName::new("tenant_acme")])
            .await
            .unwrap();

        let scope = ExecutionScope::enter(&mut conn, &TenantContext::system());
        scope.close().await.unwrap();
        assert_eq!(conn.current_search_path().await.unwrap(), "\"$user\", public");
        assert!(!conn.is_discarded());
    }

    #[tokio::test]
    async fn test_unclosed_scope_discards_connection() {
        let store = InMemoryStore::new();
        let mut conn = store.acquire().await.unwrap();
        {
            let mut scope = ExecutionScope::enter(&mut conn, &TenantContext::system());
            scope
                .conn()
                .set_search_path(&[SchemaName::new("tenant_acme")])
                .await
                .unwrap();
        }
        assert!(conn.is_discarded());
        drop(conn);
        assert_eq!(store.idle_connections(), 0);
        assert_eq!(store.connections_discarded(), 1);
    }

    #[tokio::test]
    async fn test_failed_reset_discards_connection() {
        let store = InMemoryStore::new();
        store.fail_on("RESET search_path");
        let mut conn = store.acquire().await.unwrap();

        let scope = ExecutionScope::enter(&mut conn, &TenantContext::system());
        assert!(scope.close().await.is_err());
        assert!(conn.is_discarded());
    }

    #[test]
    fn test_scoped_query_constructors() {
        assert!(!ScopedQuery::tenant("SELECT 1").system);
        assert!(ScopedQuery::system("SELECT 1").system);
    }
}
