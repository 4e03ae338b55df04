//! Helios Tenant Isolation Layer
//!
//! This crate keeps tenants of a shared PostgreSQL cluster apart. Each
//! tenant's data lives in its own schema; every request resolves to a tenant
//! context, every raw query is checked against that context before it runs,
//! and every pooled connection leaves a tenant scope with its `search_path`
//! reset.
//!
//! # Architecture
//!
//! - [`resolver`] - Tenant context resolution from request headers, host and path
//! - [`validator`] - Fail-closed query isolation rules plus an optional advisory scorer
//! - [`schema`] - Schema lifecycle: provisioning, switching, integrity checks, drop
//! - [`scope`] - Tenant-scoped execution with a guaranteed scope reset
//! - [`store`] - Relational store abstraction (PostgreSQL, in-memory)
//! - [`tenant`] - Tenant identity, schema naming and contexts
//! - [`audit`] - Fire-and-forget audit trail with a local fallback sink
//! - [`config`] - Serde-deserializable configuration
//! - [`error`] - Error types for all operations
//!
//! # Features
//!
//! - `postgres` (default) - PostgreSQL store via deadpool-postgres
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use helios_tenancy::audit::AuditTrail;
//! use helios_tenancy::config::TenancyConfig;
//! use helios_tenancy::schema::{InMemorySchemaRegistry, SchemaLifecycleManager};
//! use helios_tenancy::scope::{ScopedExecutor, ScopedQuery};
//! use helios_tenancy::store::InMemoryStore;
//! use helios_tenancy::tenant::{SchemaNaming, TenantContext, TenantId, TenantSource};
//! use helios_tenancy::validator::IsolationValidator;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let config = TenancyConfig::default();
//! let audit = AuditTrail::local();
//!
//! let schemas = Arc::new(
//!     SchemaLifecycleManager::new(
//!         Arc::new(InMemoryStore::new()),
//!         config.schema.clone(),
//!         Arc::new(InMemorySchemaRegistry::new()),
//!         audit.clone(),
//!     )
//!     .unwrap(),
//! );
//! let naming = SchemaNaming::new(&config.schema).unwrap();
//! let validator =
//!     Arc::new(IsolationValidator::new(config.validator.clone(), naming, audit.clone()).unwrap());
//! let executor = ScopedExecutor::new(schemas.clone(), validator, audit);
//!
//! let acme = TenantId::new("acme");
//! schemas.create_tenant_schema(&acme).await.unwrap();
//!
//! let ctx = TenantContext::for_tenant(acme, TenantSource::Header);
//! let rows = executor
//!     .run_scoped(&ctx, ScopedQuery::tenant("SELECT * FROM users"))
//!     .await
//!     .unwrap();
//! assert_eq!(rows.value(0, "schema"), Some("tenant_acme"));
//!
//! let denied = executor
//!     .run_scoped(&ctx, ScopedQuery::tenant(r#"SELECT * FROM "tenant_beta"."users""#))
//!     .await
//!     .unwrap_err();
//! assert_eq!(denied.to_string(), "access denied");
//! # });
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod audit;
pub mod config;
pub mod error;
pub mod resolver;
pub mod schema;
pub mod scope;
pub mod store;
pub mod tenant;
pub mod validator;

// Re-export commonly used types at crate root
pub use error::{TenancyError, TenancyResult};
pub use tenant::{SchemaName, TenantContext, TenantId, TenantScope};

pub use config::TenancyConfig;
pub use resolver::TenantResolver;
pub use schema::{SchemaLifecycleManager, SchemaStatus};
pub use scope::{ScopedExecutor, ScopedQuery};
pub use validator::{IsolationValidator, ValidationVerdict};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
