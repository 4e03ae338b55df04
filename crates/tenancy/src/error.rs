//! Error types for the tenancy layer.
//!
//! Errors are organized as a hierarchy: [`TenancyError`] wraps one enum per
//! concern (configuration, schema lifecycle, isolation, backend). Caller-facing
//! `Display` output stays generic ("access denied", "tenant context required",
//! "not found"); the reason code, rule id and tenant are kept in fields for the
//! audit trail.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

use crate::audit::Severity;
use crate::schema::SchemaStatus;
use crate::tenant::{SchemaName, TenantId};
use crate::validator::ReasonCode;

/// The primary error type for all tenancy operations.
#[derive(Error, Debug)]
pub enum TenancyError {
    /// Missing or invalid bootstrap state.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Schema lifecycle errors.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Validator denials and cross-tenant mismatches.
    #[error(transparent)]
    Isolation(#[from] IsolationViolation),

    /// Relational store errors.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl TenancyError {
    /// Returns true if this error is an isolation violation.
    pub fn is_isolation_violation(&self) -> bool {
        matches!(self, TenancyError::Isolation(_))
    }

    /// Returns true if this error reports an unprovisioned tenant.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TenancyError::Schema(SchemaError::NotFound { .. }))
    }
}

/// Result type for tenancy operations.
pub type TenancyResult<T> = Result<T, TenancyError>;

/// Missing or invalid bootstrap state. Fatal at startup for the system schema.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("system schema {schema} failed integrity validation; missing: {}", missing.join(", "))]
    SystemSchemaIncomplete {
        schema: SchemaName,
        missing: Vec<String>,
    },

    #[error("invalid schema name '{name}': {reason}")]
    InvalidSchemaName { name: String, reason: String },

    #[error("invalid pattern for {field}: {source}")]
    InvalidPattern {
        field: &'static str,
        #[source]
        source: regex::Error,
    },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

/// Errors raised by the schema lifecycle manager.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// Operation against an unprovisioned tenant.
    #[error("not found")]
    NotFound { tenant_id: TenantId, schema: SchemaName },

    /// Provisioning failed and was rolled back.
    #[error("schema provisioning failed")]
    CreationFailed {
        tenant_id: TenantId,
        schema: SchemaName,
        #[source]
        source: BackendError,
    },

    /// Two distinct tenant ids sanitize onto the same schema name.
    #[error("schema name collision")]
    Collision {
        schema: SchemaName,
        requested: TenantId,
        owner: String,
    },

    #[error("invalid schema status transition: {from} -> {to}")]
    InvalidTransition {
        schema: SchemaName,
        from: SchemaStatus,
        to: SchemaStatus,
    },

    #[error("drop confirmation does not match")]
    ConfirmationMismatch { schema: SchemaName, confirmed: String },

    #[error("invalid tenant id")]
    InvalidTenantId { tenant_id: String, reason: String },
}

/// A rejected operation: validator denial, cross-tenant mismatch, or a
/// missing tenant context.
///
/// `Display` never includes the diagnostic fields.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", self.public_message())]
pub struct IsolationViolation {
    /// Why the operation was rejected.
    pub reason: ReasonCode,
    /// Audit severity of the rejection.
    pub severity: Severity,
    /// Id of the rule that matched, if a rule did.
    pub rule: Option<&'static str>,
    /// Tenant the operation ran for.
    pub tenant_id: Option<TenantId>,
}

impl IsolationViolation {
    /// Creates a violation for the given reason.
    pub fn new(reason: ReasonCode, severity: Severity) -> Self {
        Self {
            reason,
            severity,
            rule: None,
            tenant_id: None,
        }
    }

    /// A non-system operation arrived without a resolved tenant.
    pub fn tenant_context_required() -> Self {
        Self::new(ReasonCode::TenantContextRequired, Severity::High)
    }

    /// Attaches the matched rule id.
    pub fn with_rule(mut self, rule: &'static str) -> Self {
        self.rule = Some(rule);
        self
    }

    /// Attaches the tenant the operation ran for.
    pub fn with_tenant(mut self, tenant_id: Option<TenantId>) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    /// The caller-facing message.
    fn public_message(&self) -> &'static str {
        match self.reason {
            ReasonCode::TenantContextRequired => "tenant context required",
            _ => "access denied",
        }
    }
}

/// Errors originating from the relational store.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("backend unavailable: {backend_name}")]
    Unavailable {
        backend_name: String,
        message: String,
    },

    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// The object being created already exists (e.g. a concurrent creator won).
    #[error("{object} already exists")]
    AlreadyExists { object: String },

    #[error("query execution failed: {message}")]
    QueryError { message: String },

    #[error("transaction failed: {message}")]
    TransactionError { message: String },

    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Failures of the advisory risk scorer. Never surfaced to callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdvisoryError {
    #[error("advisory timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("advisory {scorer} failed: {message}")]
    Failed { scorer: String, message: String },
}

/// Failures of an audit sink. Absorbed by the audit trail's fallback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuditError {
    #[error("audit sink {sink} unavailable")]
    Unavailable { sink: String },

    #[error("audit sink {sink} rejected event: {message}")]
    Rejected { sink: String, message: String },
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for BackendError {
    fn from(err: tokio_postgres::Error) -> Self {
        use tokio_postgres::error::SqlState;

        // Concurrent CREATE SCHEMA can surface as a unique violation on the
        // namespace catalog instead of 42P06.
        let duplicate_namespace = err.code() == Some(&SqlState::UNIQUE_VIOLATION)
            && err
                .as_db_error()
                .and_then(|db| db.constraint())
                .is_some_and(|c| c == "pg_namespace_nspname_index");

        match err.code() {
            Some(code) if *code == SqlState::DUPLICATE_SCHEMA || duplicate_namespace => BackendError::AlreadyExists {
                object: err
                    .as_db_error()
                    .map(|db| db.message().to_string())
                    .unwrap_or_else(|| "schema".to_string()),
            },
            _ => BackendError::Internal {
                backend_name: "postgres".to_string(),
                message: err.to_string(),
                source: Some(Box::new(err)),
            },
        }
    }
}
