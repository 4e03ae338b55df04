//! Schema records and their status lifecycle.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::tenant::{SchemaName, TenantId};

/// Provisioning status of a tenant schema.
///
/// ```text
/// PENDING ──> READY ──> DROPPED
///    │  ^       │          │
///    v  │       v          │
///   FAILED <────┘          │
///    ^  └──────────────────┘ (re-provision)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchemaStatus {
    /// Provisioning has started.
    Pending,
    /// Provisioned and usable.
    Ready,
    /// Provisioning failed or integrity validation found it incomplete.
    Failed,
    /// Dropped.
    Dropped,
}

impl SchemaStatus {
    /// Returns whether moving from `self` to `to` is allowed.
    pub fn can_transition(self, to: SchemaStatus) -> bool {
        use SchemaStatus::*;
        matches!(
            (self, to),
            (Pending, Ready)
                | (Pending, Failed)
                | (Ready, Failed)
                | (Ready, Dropped)
                | (Failed, Pending)
                | (Failed, Dropped)
                | (Dropped, Pending)
        )
    }

    /// Returns the stored form, e.g. `READY`.
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaStatus::Pending => "PENDING",
            SchemaStatus::Ready => "READY",
            SchemaStatus::Failed => "FAILED",
            SchemaStatus::Dropped => "DROPPED",
        }
    }
}

impl fmt::Display for SchemaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the lifecycle manager knows about one tenant schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaRecord {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Physical schema name.
    pub schema: SchemaName,
    /// Lifecycle status.
    pub status: SchemaStatus,
    /// Tables provisioned in the schema.
    pub tables: BTreeSet<String>,
    /// When the record was first created.
    pub created_at: DateTime<Utc>,
    /// Time of the last status change.
    pub updated_at: DateTime<Utc>,
}

impl SchemaRecord {
    /// A new record in `PENDING`.
    pub fn pending(tenant_id: TenantId, schema: SchemaName) -> Self {
        let now = Utc::now();
        Self {
            tenant_id,
            schema,
            status: SchemaStatus::Pending,
            tables: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves the record to `to`, enforcing the status lifecycle.
    pub fn transition(&mut self, to: SchemaStatus) -> Result<(), SchemaError> {
        if !self.status.can_transition(to) {
            return Err(SchemaError::InvalidTransition {
                schema: self.schema.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Builder form of [`transition`](Self::transition).
    pub fn into_status(mut self, to: SchemaStatus) -> Result<Self, SchemaError> {
        self.transition(to)?;
        Ok(self)
    }

    /// Replaces the recorded table set.
    pub fn with_tables<I, T>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tables = tables.into_iter().map(Into::into).collect();
        self
    }

    /// Returns true if the schema is usable.
    pub fn is_ready(&self) -> bool {
        self.status == SchemaStatus::Ready
    }
}
