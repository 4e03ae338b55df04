//! Integration tests for request-to-schema resolution.
//!
//! Covers the path from raw request metadata to a scoped query:
//! - Header, subdomain and path-prefix resolution feeding the executor
//! - Hostile tenant ids sanitized into harmless schema names
//! - System contexts and trusted overrides

mod common;

use std::sync::Arc;

use helios_tenancy::audit::{AuditTrail, MemoryAuditSink};
use helios_tenancy::config::{ResolverConfig, SchemaConfig};
use helios_tenancy::resolver::TenantResolver;
use helios_tenancy::scope::ScopedQuery;
use helios_tenancy::tenant::{SchemaNaming, TenantId, TenantSource};
use http::Request;
use http::request::Parts;

use common::Harness;

fn parts(builder: http::request::Builder) -> Parts {
    builder.body(()).unwrap().into_parts().0
}

fn resolver(config: ResolverConfig) -> (TenantResolver, Arc<MemoryAuditSink>) {
    let sink = Arc::new(MemoryAuditSink::new());
    (TenantResolver::new(config, AuditTrail::new(sink.clone())), sink)
}

// =============================================================================
// Resolution Scenarios
// =============================================================================

#[test]
fn test_header_resolves_tenant_and_schema() {
    let (resolver, _) = resolver(ResolverConfig::default());
    let ctx = resolver.resolve_context(&parts(
        Request::get("/api/users").header("tenant-id", "acme"),
    ));

    assert_eq!(ctx.tenant_id(), Some(&TenantId::new("acme")));
    assert!(!ctx.is_system());

    let naming = SchemaNaming::new(&SchemaConfig::default()).unwrap();
    let schema = naming.schema_for(ctx.tenant_id().unwrap()).unwrap();
    assert_eq!(schema.as_str(), "tenant_acme");
}

#[test]
fn test_hostile_header_is_sanitized() {
    let (resolver, _) = resolver(ResolverConfig::default());
    let ctx = resolver.resolve_context(&parts(
        Request::get("/api/users").header("tenant-id", "Admin; DROP TABLE users;"),
    ));

    let naming = SchemaNaming::new(&SchemaConfig::default()).unwrap();
    let schema = naming.schema_for(ctx.tenant_id().unwrap()).unwrap();
    assert_eq!(schema.as_str(), "tenant_admin__drop_table_users_");
}

#[test]
fn test_no_signal_is_system_and_access_is_audited() {
    let (resolver, sink) = resolver(ResolverConfig::default());
    let ctx = resolver.resolve_context(&parts(Request::get("/health")));
    assert!(ctx.is_system());

    assert!(resolver.validate_access(&ctx, &TenantId::new("anything")));
    assert!(resolver.validate_access(&ctx, &TenantId::new("other")));
    assert_eq!(sink.events_of("system_context_access").len(), 2);
}

#[test]
fn test_source_priority() {
    let (resolver, _) = resolver(ResolverConfig::default().with_base_domain("example.com"));

    let resolved = resolver.resolve(&parts(
        Request::get("/gamma/api/users")
            .header("host", "beta.example.com")
            .header("x-tenant-id", "alpha"),
    ));
    assert_eq!(resolved.source(), TenantSource::Header);
    assert!(resolved.has_conflict());

    let resolved = resolver.resolve(&parts(
        Request::get("/gamma/api/users").header("host", "beta.example.com"),
    ));
    assert_eq!(resolved.context.tenant_id(), Some(&TenantId::new("beta")));

    let resolved = resolver.resolve(&parts(Request::get("/gamma/api/users")));
    assert_eq!(resolved.source(), TenantSource::PathPrefix);
    assert_eq!(resolved.context.tenant_id(), Some(&TenantId::new("gamma")));
}

#[test]
fn test_cross_tenant_access_is_an_incident() {
    let (resolver, sink) = resolver(ResolverConfig::default());
    let ctx = resolver.resolve_context(&parts(
        Request::get("/api/users")
            .header("tenant-id", "alpha")
            .header("x-forwarded-for", "203.0.113.7"),
    ));

    assert!(!resolver.validate_access(&ctx, &TenantId::new("beta")));
    let incidents = sink.events_of("cross_tenant_access");
    assert_eq!(incidents.len(), 1);
    assert_eq!(
        incidents[0].detail("attempted_tenant").and_then(|v| v.as_str()),
        Some("beta")
    );
}

#[test]
fn test_override_requires_trusted_caller() {
    let (resolver, sink) =
        resolver(ResolverConfig::default().with_trusted_caller("provisioning-worker"));

    let forced = resolver
        .force_tenant_context("provisioning-worker", TenantId::new("acme"), "backfill")
        .unwrap();
    assert!(forced.is_forced());

    let denied = resolver.force_system_context("web-handler", "debugging");
    assert!(denied.is_err());
    assert_eq!(sink.events_of("context_override_denied").len(), 1);
}

// =============================================================================
// Resolution Through Execution
// =============================================================================

#[tokio::test]
async fn test_resolved_context_scopes_queries() {
    let harness = Harness::new();
    harness.provision(&["acme", "beta"]).await;

    let (resolver, _) = resolver(ResolverConfig::default());
    let ctx = resolver.resolve_context(&parts(
        Request::get("/api/users").header("tenant-id", "ACME"),
    ));

    let rows = harness
        .executor
        .run_scoped(&ctx, ScopedQuery::tenant("SELECT * FROM users"))
        .await
        .unwrap();
    assert_eq!(rows.value(0, "schema"), Some("tenant_acme"));
}

#[tokio::test]
async fn test_system_context_cannot_run_tenant_query_without_scope() {
    let harness = Harness::new();
    harness.provision(&["acme"]).await;

    let (resolver, _) = resolver(ResolverConfig::default());
    let ctx = resolver.resolve_context(&parts(Request::get("/health")));

    // No tenant scope: unqualified tenant tables do not resolve.
    let err = harness
        .executor
        .run_scoped(&ctx, ScopedQuery::tenant("SELECT * FROM users"))
        .await
        .unwrap_err();
    assert!(!err.is_isolation_violation());
}
