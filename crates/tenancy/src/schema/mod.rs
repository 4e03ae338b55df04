//! Schema lifecycle: provisioning, switching, validation and drop of
//! per-tenant schemas.
//!
//! Every tenant's tables live in the schema named by
//! [`SchemaNaming::schema_for`](crate::tenant::SchemaNaming::schema_for).
//! The system schema (`shared` by default) holds the tenant registry and the
//! schema event log, and is bootstrapped before the first tenant schema.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use helios_tenancy::audit::AuditTrail;
//! use helios_tenancy::config::SchemaConfig;
//! use helios_tenancy::schema::{InMemorySchemaRegistry, SchemaLifecycleManager};
//! use helios_tenancy::store::InMemoryStore;
//! use helios_tenancy::tenant::TenantId;
//!
//! # tokio_test_block_on(async {
//! let manager = SchemaLifecycleManager::new(
//!     Arc::new(InMemoryStore::new()),
//!     SchemaConfig::default(),
//!     Arc::new(InMemorySchemaRegistry::new()),
//!     AuditTrail::local(),
//! )
//! .unwrap();
//!
//! let result = manager.create_tenant_schema(&TenantId::new("acme")).await.unwrap();
//! assert!(result.created);
//! assert_eq!(result.record.schema.as_str(), "tenant_acme");
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

mod ddl;
mod manager;
mod record;
mod registry;

pub use manager::{DropConfirmation, IntegrityReport, ProvisionResult, SchemaLifecycleManager};
pub use record::{SchemaRecord, SchemaStatus};
pub use registry::{InMemorySchemaRegistry, SchemaRegistry};
