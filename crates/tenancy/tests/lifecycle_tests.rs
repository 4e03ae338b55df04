//! Integration tests for the schema lifecycle.
//!
//! Covers provisioning races, rollback, drop and re-provision, and integrity
//! validation against the in-memory store.

mod common;

use helios_tenancy::config::{SchemaConfig, TableDefinition, TenancyConfig};
use helios_tenancy::error::{ConfigurationError, SchemaError};
use helios_tenancy::schema::{DropConfirmation, SchemaStatus};
use helios_tenancy::scope::ScopedQuery;
use helios_tenancy::store::InMemoryStore;
use helios_tenancy::tenant::TenantId;
use helios_tenancy::{TenancyError, TenantScope};

use common::{Harness, tenant_ctx};

// =============================================================================
// Concurrent Provisioning
// =============================================================================

#[tokio::test]
async fn test_concurrent_create_on_one_manager() {
    let harness = Harness::new();
    let beta = TenantId::new("beta");

    let (a, b) = tokio::join!(
        harness.schemas.create_tenant_schema(&beta),
        harness.schemas.create_tenant_schema(&beta),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!([a.created, b.created].iter().filter(|c| **c).count(), 1);
    assert_eq!(harness.store.schemas().iter().filter(|s| *s == "tenant_beta").count(), 1);
    assert_eq!(harness.store.row_count("shared", "schema_events"), Some(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_create_across_managers() {
    let store = InMemoryStore::new();
    let first = Harness::on_store(store.clone());
    let second = Harness::on_store(store.clone());
    let beta = TenantId::new("beta");

    let schemas_a = first.schemas.clone();
    let schemas_b = second.schemas.clone();
    let (id_a, id_b) = (beta.clone(), beta.clone());
    let a = tokio::spawn(async move { schemas_a.create_tenant_schema(&id_a).await });
    let b = tokio::spawn(async move { schemas_b.create_tenant_schema(&id_b).await });

    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();

    assert_eq!([a.created, b.created].iter().filter(|c| **c).count(), 1);
    assert!(a.record.is_ready() && b.record.is_ready());
    assert_eq!(store.schemas().iter().filter(|s| *s == "tenant_beta").count(), 1);
    let tables = store.tables("tenant_beta");
    assert!(tables.contains(&"users".to_string()));
    assert!(tables.contains(&"orders".to_string()));
}

#[tokio::test]
async fn test_concurrent_create_of_distinct_tenants() {
    let harness = Harness::new();
    let ids: Vec<TenantId> = (0..8).map(|i| TenantId::new(format!("t{}", i))).collect();

    let results = futures_join_all(&harness, &ids).await;
    assert!(results.iter().all(|r| r.created));

    let listed = harness.schemas.list_tenant_schemas().await.unwrap();
    assert_eq!(listed.len(), ids.len());
}

async fn futures_join_all(
    harness: &Harness,
    ids: &[TenantId],
) -> Vec<helios_tenancy::schema::ProvisionResult> {
    let mut handles = Vec::new();
    for id in ids {
        let schemas = harness.schemas.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            schemas.create_tenant_schema(&id).await
        }));
    }
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }
    results
}

// =============================================================================
// Provisioning
// =============================================================================

#[tokio::test]
async fn test_provisioning_is_idempotent() {
    let harness = Harness::new();
    let acme = TenantId::new("acme");

    let first = harness.schemas.create_tenant_schema(&acme).await.unwrap();
    let second = harness.schemas.create_tenant_schema(&acme).await.unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(second.record.status, SchemaStatus::Ready);
    assert_eq!(harness.audit.events_of("schema_created").len(), 1);
}

#[tokio::test]
async fn test_failed_step_rolls_back_everything() {
    let harness = Harness::new();
    harness.schemas.ensure_system_schema().await.unwrap();
    harness.store.fail_on("GRANT USAGE ON SCHEMA");
    let acme = TenantId::new("acme");

    let err = harness.schemas.create_tenant_schema(&acme).await.unwrap_err();
    assert!(matches!(err, TenancyError::Schema(SchemaError::CreationFailed { .. })));
    assert!(!harness.store.schemas().contains(&"tenant_acme".to_string()));
    assert_eq!(harness.store.row_count("shared", "tenant_registry"), Some(0));
    assert_eq!(
        harness.schemas.record(&acme).map(|r| r.status),
        Some(SchemaStatus::Failed)
    );
    assert_eq!(harness.audit.events_of("schema_provision_failed").len(), 1);

    harness.store.clear_failures();
    let retry = harness.schemas.create_tenant_schema(&acme).await.unwrap();
    assert!(retry.created);
    assert_eq!(retry.record.status, SchemaStatus::Ready);
}

#[tokio::test]
async fn test_colliding_tenant_ids_are_rejected() {
    let harness = Harness::new();
    // Both ids sanitize to tenant_acme_corp.
    harness.provision(&["acme.corp"]).await;

    let err = harness
        .schemas
        .create_tenant_schema(&TenantId::new("acme corp"))
        .await
        .unwrap_err();
    assert!(matches!(err, TenancyError::Schema(SchemaError::Collision { .. })));

    // The colliding tenant cannot be scoped onto the other tenant's schema.
    let err = harness
        .executor
        .run_scoped(&tenant_ctx("acme corp"), ScopedQuery::tenant("SELECT * FROM users"))
        .await
        .unwrap_err();
    assert!(matches!(err, TenancyError::Schema(SchemaError::Collision { .. })));
    assert_eq!(harness.audit.events_of("schema_collision").len(), 2);
}

#[tokio::test]
async fn test_service_role_receives_grants() {
    let config = TenancyConfig {
        schema: SchemaConfig::default().with_service_role("app_rw"),
        ..Default::default()
    };
    let harness = Harness::with_config(config, None);
    harness.provision(&["acme"]).await;

    assert!(harness.store.grant_count("tenant_acme") >= 5);
    assert!(
        harness
            .store
            .statement_log()
            .iter()
            .any(|sql| sql.starts_with("GRANT USAGE ON SCHEMA") && sql.ends_with("TO \"app_rw\""))
    );
}

#[tokio::test]
async fn test_custom_base_tables_are_provisioned() {
    let config = TenancyConfig {
        schema: SchemaConfig::default().with_base_tables(vec![
            TableDefinition::new("invoices", &["id BIGSERIAL PRIMARY KEY", "total_cents BIGINT"])
                .with_index(&["total_cents"]),
        ]),
        ..Default::default()
    };
    let harness = Harness::with_config(config, None);
    harness.provision(&["acme"]).await;

    assert_eq!(harness.store.tables("tenant_acme"), vec!["invoices"]);
    let report = harness
        .schemas
        .validate_integrity(&TenantScope::Tenant(TenantId::new("acme")))
        .await
        .unwrap();
    assert!(report.valid);
}

// =============================================================================
// Drop And Re-provision
// =============================================================================

#[tokio::test]
async fn test_drop_then_reprovision() {
    let harness = Harness::new();
    harness.provision(&["acme"]).await;
    let acme = TenantId::new("acme");
    let ctx = tenant_ctx("acme");

    let dropped = harness
        .schemas
        .drop_tenant_schema(&acme, &DropConfirmation::new("acme"))
        .await
        .unwrap();
    assert!(dropped);
    assert!(!harness.store.schemas().contains(&"tenant_acme".to_string()));

    let err = harness
        .executor
        .run_scoped(&ctx, ScopedQuery::tenant("SELECT * FROM users"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.to_string(), "not found");

    let again = harness.schemas.create_tenant_schema(&acme).await.unwrap();
    assert!(again.created);
    let rows = harness
        .executor
        .run_scoped(&ctx, ScopedQuery::tenant("SELECT * FROM users"))
        .await
        .unwrap();
    assert_eq!(rows.value(0, "schema"), Some("tenant_acme"));
    assert_eq!(harness.store.row_count("shared", "schema_events"), Some(3));
}

#[tokio::test]
async fn test_drop_leaves_other_tenants_alone() {
    let harness = Harness::new();
    harness.provision(&["acme", "beta"]).await;

    harness
        .schemas
        .drop_tenant_schema(&TenantId::new("acme"), &DropConfirmation::new("acme"))
        .await
        .unwrap();

    let rows = harness
        .executor
        .run_scoped(&tenant_ctx("beta"), ScopedQuery::tenant("SELECT * FROM orders"))
        .await
        .unwrap();
    assert_eq!(rows.value(0, "schema"), Some("tenant_beta"));
}

#[tokio::test]
async fn test_drop_with_wrong_confirmation_keeps_schema() {
    let harness = Harness::new();
    harness.provision(&["acme"]).await;

    let err = harness
        .schemas
        .drop_tenant_schema(&TenantId::new("acme"), &DropConfirmation::new("beta"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TenancyError::Schema(SchemaError::ConfirmationMismatch { .. })
    ));
    assert!(harness.store.schemas().contains(&"tenant_acme".to_string()));
    assert_eq!(harness.audit.events_of("schema_drop_rejected").len(), 1);
}

// =============================================================================
// Integrity
// =============================================================================

#[tokio::test]
async fn test_tenant_integrity_failure_marks_record() {
    let harness = Harness::new();
    harness.provision(&["acme"]).await;
    let acme = TenantId::new("acme");

    assert!(harness.store.remove_table("tenant_acme", "orders"));
    let report = harness
        .schemas
        .validate_integrity(&TenantScope::Tenant(acme.clone()))
        .await
        .unwrap();

    assert!(!report.valid);
    assert_eq!(report.missing, vec!["orders"]);
    assert_eq!(
        harness.schemas.record(&acme).map(|r| r.status),
        Some(SchemaStatus::Failed)
    );
    assert_eq!(harness.audit.events_of("schema_integrity_failed").len(), 1);
}

#[tokio::test]
async fn test_system_integrity_failure_is_fatal() {
    let harness = Harness::new();
    harness.schemas.ensure_system_schema().await.unwrap();

    assert!(harness.store.remove_table("shared", "tenant_registry"));
    let err = harness
        .schemas
        .validate_integrity(&TenantScope::System)
        .await
        .unwrap_err();

    match err {
        TenancyError::Configuration(ConfigurationError::SystemSchemaIncomplete { missing, .. }) => {
            assert_eq!(missing, vec!["tenant_registry"]);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(!harness.schemas.is_system_ready());
    assert_eq!(harness.audit.events_of("system_schema_incomplete").len(), 1);
}

#[tokio::test]
async fn test_bootstrap_repairs_missing_system_table() {
    let harness = Harness::new();
    harness.schemas.ensure_system_schema().await.unwrap();
    harness.store.remove_table("shared", "schema_events");

    let report = harness.schemas.ensure_system_schema().await.unwrap();
    assert!(report.valid);
    assert!(harness.schemas.is_system_ready());
}
