//! Cache of provisioned schemas.
//!
//! The registry is a cache: it speeds up the "is this schema ready" check on
//! the switch path and holds status for diagnostics. Integrity validation
//! always reads the database instead.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::tenant::SchemaName;

use super::record::{SchemaRecord, SchemaStatus};

/// Shared store of [`SchemaRecord`]s, keyed by schema name.
pub trait SchemaRegistry: Send + Sync {
    /// Returns the record for `schema`.
    fn get(&self, schema: &SchemaName) -> Option<SchemaRecord>;

    /// Inserts or replaces a record.
    fn upsert(&self, record: SchemaRecord);

    /// Removes and returns the record for `schema`.
    fn remove(&self, schema: &SchemaName) -> Option<SchemaRecord>;

    /// Returns all records, sorted by schema name.
    fn list(&self) -> Vec<SchemaRecord>;

    /// Returns true if `schema` is cached as `READY`.
    fn is_ready(&self, schema: &SchemaName) -> bool {
        self.get(schema).is_some_and(|r| r.is_ready())
    }

    /// Updates the status of a cached record, if present and allowed.
    ///
    /// Returns false when the record is missing or the transition is invalid.
    fn set_status(&self, schema: &SchemaName, status: SchemaStatus) -> bool {
        match self.get(schema) {
            Some(mut record) => {
                if record.transition(status).is_err() {
                    return false;
                }
                self.upsert(record);
                true
            }
            None => false,
        }
    }
}

/// A process-local registry.
#[derive(Debug, Default)]
pub struct InMemorySchemaRegistry {
    records: RwLock<HashMap<SchemaName, SchemaRecord>>,
}

impl InMemorySchemaRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl SchemaRegistry for InMemorySchemaRegistry {
    fn get(&self, schema: &SchemaName) -> Option<SchemaRecord> {
        self.records.read().get(schema).cloned()
    }

    fn upsert(&self, record: SchemaRecord) {
        self.records.write().insert(record.schema.clone(), record);
    }

    fn remove(&self, schema: &SchemaName) -> Option<SchemaRecord> {
        self.records.write().remove(schema)
    }

    fn list(&self) -> Vec<SchemaRecord> {
        let mut records: Vec<_> = self.records.read().values().cloned().collect();
        records.sort_by(|a, b| a.schema.cmp(&b.schema));
        records
    }

    fn set_status(&self, schema: &SchemaName, status: SchemaStatus) -> bool {
        let mut records = self.records.write();
        match records.get_mut(schema) {
            Some(record) => record.transition(status).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::TenantId;

    fn record(id: &str) -> SchemaRecord {
        SchemaRecord::pending(TenantId::new(id), SchemaName::new(format!("tenant_{}", id)))
    }

    #[test]
    fn test_upsert_and_ready() {
        let registry = InMemorySchemaRegistry::new();
        let schema = SchemaName::new("tenant_acme");
        registry.upsert(record("acme"));
        assert!(!registry.is_ready(&schema));

        assert!(registry.set_status(&schema, SchemaStatus::Ready));
        assert!(registry.is_ready(&schema));
    }

    #[test]
    fn test_invalid_status_change_is_rejected() {
        let registry = InMemorySchemaRegistry::new();
        let schema = SchemaName::new("tenant_acme");
        registry.upsert(record("acme"));
        assert!(!registry.set_status(&schema, SchemaStatus::Dropped));
        assert_eq!(registry.get(&schema).unwrap().status, SchemaStatus::Pending);
    }

    /// A registry that relies on the provided `set_status`.
    struct DelegatingRegistry(InMemorySchemaRegistry);

    impl SchemaRegistry for DelegatingRegistry {
        fn get(&self, schema: &SchemaName) -> Option<SchemaRecord> {
            self.0.get(schema)
        }

        fn upsert(&self, record: SchemaRecord) {
            self.0.upsert(record)
        }

        fn remove(&self, schema: &SchemaName) -> Option<SchemaRecord> {
            self.0.remove(schema)
        }

        fn list(&self) -> Vec<SchemaRecord> {
            self.0.list()
        }
    }

    #[test]
    fn test_default_set_status() {
        let registry = DelegatingRegistry(InMemorySchemaRegistry::new());
        let schema = SchemaName::new("tenant_acme");
        assert!(!registry.set_status(&schema, SchemaStatus::Ready));

        registry.upsert(record("acme"));
        assert!(!registry.set_status(&schema, SchemaStatus::Dropped));
        assert_eq!(registry.get(&schema).unwrap().status, SchemaStatus::Pending);

        assert!(registry.set_status(&schema, SchemaStatus::Ready));
        assert!(registry.is_ready(&schema));
        assert!(!registry.set_status(&schema, SchemaStatus::Pending));
        assert!(registry.set_status(&schema, SchemaStatus::Dropped));
        assert_eq!(registry.get(&schema).unwrap().status, SchemaStatus::Dropped);
    }

    #[test]
    fn test_remove_and_list() {
        let registry = InMemorySchemaRegistry::new();
        registry.upsert(record("beta"));
        registry.upsert(record("alpha"));
        let names: Vec<_> = registry
            .list()
            .into_iter()
            .map(|r| r.schema.to_string())
            .collect();
        assert_eq!(names, vec!["tenant_alpha", "tenant_beta"]);

        assert!(registry.remove(&SchemaName::new("tenant_beta")).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_concurrent_access() {
        let registry = std::sync::Arc::new(InMemorySchemaRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.upsert(record(&format!("t{}", i))))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.len(), 8);
    }
}
