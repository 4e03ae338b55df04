//! Tenant identity types.
//!
//! Every request resolves to a [`TenantContext`] whose [`TenantScope`] is
//! either one tenant or the platform itself. A tenant's data lives in the
//! schema named by [`SchemaNaming::schema_for`].
//!
//! # Example
//!
//! ```
//! use helios_tenancy::config::SchemaConfig;
//! use helios_tenancy::tenant::{SchemaNaming, TenantContext, TenantId, TenantSource};
//!
//! let ctx = TenantContext::for_tenant(TenantId::new("acme"), TenantSource::Header);
//! assert!(!ctx.is_system());
//!
//! let naming = SchemaNaming::new(&SchemaConfig::default()).unwrap();
//! let schema = naming.schema_for(ctx.tenant_id().unwrap()).unwrap();
//! assert_eq!(schema.as_str(), "tenant_acme");
//! ```

mod context;
mod id;
mod naming;
mod source;

pub use context::{AccessGrant, TenantContext, TenantScope};
pub use id::{SchemaName, TenantId, TenantIdError};
pub use naming::SchemaNaming;
pub use source::TenantSource;

pub(crate) use id::{escape_literal, quote_identifier};
