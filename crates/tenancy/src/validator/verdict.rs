//! Validation verdicts.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::audit::Severity;
use crate::error::IsolationViolation;
use crate::tenant::TenantId;

/// Why a query was allowed or denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    /// No rule matched.
    Allowed,
    /// Reference to a reserved system catalog or metadata schema.
    SystemCatalogAccess,
    /// Destructive DDL/DML outside a system operation.
    DestructiveOperation,
    /// Scope or privilege manipulation outside a system operation.
    PrivilegedOperation,
    /// Reference to another tenant's schema.
    CrossTenantAccess,
    /// Recognized injection signature.
    InjectionSignature,
    /// Non-system operation without a resolved tenant.
    TenantContextRequired,
    /// The query could not be evaluated.
    EvaluationError,
    /// The advisory scorer rated the query above the deny threshold.
    AdvisoryDenied,
    /// Allowed, but the advisory scorer raised a finding.
    AdvisoryFlagged,
    /// Allowed while the advisory scorer was unavailable.
    AdvisoryUnavailable,
}

impl ReasonCode {
    /// Returns the wire form, e.g. `CROSS_TENANT_ACCESS`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::Allowed => "ALLOWED",
            ReasonCode::SystemCatalogAccess => "SYSTEM_CATALOG_ACCESS",
            ReasonCode::DestructiveOperation => "DESTRUCTIVE_OPERATION",
            ReasonCode::PrivilegedOperation => "PRIVILEGED_OPERATION",
            ReasonCode::CrossTenantAccess => "CROSS_TENANT_ACCESS",
            ReasonCode::InjectionSignature => "INJECTION_SIGNATURE",
            ReasonCode::TenantContextRequired => "TENANT_CONTEXT_REQUIRED",
            ReasonCode::EvaluationError => "EVALUATION_ERROR",
            ReasonCode::AdvisoryDenied => "ADVISORY_DENIED",
            ReasonCode::AdvisoryFlagged => "ADVISORY_FLAGGED",
            ReasonCode::AdvisoryUnavailable => "ADVISORY_UNAVAILABLE",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the advisory layer contributed to a verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AdvisoryOutcome {
    /// Not consulted: disabled, not configured, or a static rule already denied.
    Skipped,
    /// Consulted and rated the query secure.
    Passed {
        /// Scorer confidence in `[0, 1]`.
        confidence: f32,
    },
    /// Consulted and raised a finding.
    Flagged {
        /// Scorer-defined issue label.
        issue_type: Option<String>,
        /// Scorer confidence in `[0, 1]`.
        confidence: f32,
        /// Severity derived from the confidence.
        severity: Severity,
    },
    /// Timed out or failed.
    Unavailable {
        /// Rendered advisory error.
        error: String,
    },
}

/// The result of validating one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationVerdict {
    /// Whether the query may run.
    pub allowed: bool,
    /// Why the query was denied, or `Allowed`.
    pub reason: ReasonCode,
    /// Severity of the finding.
    pub severity: Severity,
    /// Id of the static rule that decided the verdict, if any.
    pub matched_rule: Option<&'static str>,
    /// What the advisory layer contributed.
    pub advisory: AdvisoryOutcome,
}

impl ValidationVerdict {
    /// An allow with no findings.
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: ReasonCode::Allowed,
            severity: Severity::Info,
            matched_rule: None,
            advisory: AdvisoryOutcome::Skipped,
        }
    }

    /// A denial by the given rule.
    pub fn deny(reason: ReasonCode, severity: Severity, rule: &'static str) -> Self {
        Self {
            allowed: false,
            reason,
            severity,
            matched_rule: Some(rule),
            advisory: AdvisoryOutcome::Skipped,
        }
    }

    /// Returns true if the query was denied.
    pub fn is_denied(&self) -> bool {
        !self.allowed
    }

    /// Returns true if an allowed verdict should still be audited.
    pub fn needs_audit(&self) -> bool {
        !self.allowed
            || matches!(
                self.advisory,
                AdvisoryOutcome::Flagged { .. } | AdvisoryOutcome::Unavailable { .. }
            )
    }

    /// Converts a denial into an [`IsolationViolation`].
    pub fn into_result(self, tenant_id: Option<&TenantId>) -> Result<Self, IsolationViolation> {
        if self.allowed {
            return Ok(self);
        }
        let mut violation = IsolationViolation::new(self.reason, self.severity)
            .with_tenant(tenant_id.cloned());
        violation.rule = self.matched_rule;
        Err(violation)
    }
}
