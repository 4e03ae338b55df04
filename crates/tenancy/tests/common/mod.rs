//! Common test utilities for tenancy integration tests.
//!
//! Builds the full stack (lifecycle manager, validator, scoped executor)
//! over an [`InMemoryStore`] with a [`MemoryAuditSink`] so tests can inspect
//! both the catalog and the audit trail.

#![allow(dead_code)]

use std::sync::Arc;

use helios_tenancy::audit::{AuditTrail, MemoryAuditSink};
use helios_tenancy::config::{SchemaConfig, TenancyConfig, ValidatorConfig};
use helios_tenancy::schema::{InMemorySchemaRegistry, SchemaLifecycleManager};
use helios_tenancy::scope::ScopedExecutor;
use helios_tenancy::store::InMemoryStore;
use helios_tenancy::tenant::{SchemaNaming, TenantContext, TenantId, TenantSource};
use helios_tenancy::validator::{AdvisoryRiskScorer, IsolationValidator};

/// The tenancy stack over one in-memory store.
pub struct Harness {
    pub store: InMemoryStore,
    pub audit: Arc<MemoryAuditSink>,
    pub schemas: Arc<SchemaLifecycleManager<InMemoryStore>>,
    pub validator: Arc<IsolationValidator>,
    pub executor: ScopedExecutor<InMemoryStore>,
}

impl Harness {
    /// A harness with default configuration.
    pub fn new() -> Self {
        Self::with_config(TenancyConfig::default(), None)
    }

    /// A harness whose validator consults `scorer`.
    pub fn with_advisory(validator: ValidatorConfig, scorer: Arc<dyn AdvisoryRiskScorer>) -> Self {
        let config = TenancyConfig {
            validator,
            ..Default::default()
        };
        Self::with_config(config, Some(scorer))
    }

    /// A harness over an existing store, sharing its catalog and pool.
    pub fn on_store(store: InMemoryStore) -> Self {
        Self::build(store, TenancyConfig::default(), None)
    }

    /// A harness with the given configuration.
    pub fn with_config(config: TenancyConfig, scorer: Option<Arc<dyn AdvisoryRiskScorer>>) -> Self {
        Self::build(InMemoryStore::new(), config, scorer)
    }

    fn build(
        store: InMemoryStore,
        config: TenancyConfig,
        scorer: Option<Arc<dyn AdvisoryRiskScorer>>,
    ) -> Self {
        let audit = Arc::new(MemoryAuditSink::new());
        let trail = AuditTrail::new(audit.clone());

        let schemas = Arc::new(
            SchemaLifecycleManager::new(
                Arc::new(store.clone()),
                config.schema.clone(),
                Arc::new(InMemorySchemaRegistry::new()),
                trail.clone(),
            )
            .expect("valid schema config"),
        );

        let naming = SchemaNaming::new(&config.schema).expect("valid naming");
        let mut validator = IsolationValidator::new(config.validator.clone(), naming, trail.clone())
            .expect("valid validator config");
        if let Some(scorer) = scorer {
            validator = validator.with_advisory(scorer);
        }
        let validator = Arc::new(validator);

        let executor = ScopedExecutor::new(schemas.clone(), validator.clone(), trail);

        Self {
            store,
            audit,
            schemas,
            validator,
            executor,
        }
    }

    /// Provisions schemas for `tenants`.
    pub async fn provision(&self, tenants: &[&str]) {
        for tenant in tenants {
            self.schemas
                .create_tenant_schema(&TenantId::new(tenant))
                .await
                .expect("provisioning failed");
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// A header-resolved context for `tenant`.
pub fn tenant_ctx(tenant: &str) -> TenantContext {
    TenantContext::for_tenant(TenantId::new(tenant), TenantSource::Header)
}

/// The default schema configuration.
pub fn schema_config() -> SchemaConfig {
    SchemaConfig::default()
}

/// The `search_path` of a session nobody has scoped.
pub const NEUTRAL_SEARCH_PATH: &str = "\"$user\", public";
