//! Query isolation validation.
//!
//! [`IsolationValidator`] decides whether a query may run for a tenant. The
//! decision is fail-closed: static rules run first and deny on the first
//! match, and only a statically allowed query reaches the advisory scorer.
//! The advisory consult is bounded by a short timeout; when it times out or
//! fails the query is allowed with an [`AdvisoryOutcome::Unavailable`] flag
//! rather than blocked.
//!
//! # Example
//!
//! ```
//! use helios_tenancy::audit::AuditTrail;
//! use helios_tenancy::config::{SchemaConfig, ValidatorConfig};
//! use helios_tenancy::tenant::{SchemaNaming, TenantId};
//! use helios_tenancy::validator::{IsolationValidator, ReasonCode};
//!
//! let naming = SchemaNaming::new(&SchemaConfig::default()).unwrap();
//! let validator =
//!     IsolationValidator::new(ValidatorConfig::default(), naming, AuditTrail::local()).unwrap();
//!
//! let alpha = TenantId::new("alpha");
//! let verdict =
//!     validator.validate_static(r#"SELECT * FROM "tenant_beta"."users""#, Some(&alpha), false);
//! assert_eq!(verdict.reason, ReasonCode::CrossTenantAccess);
//! ```

mod advisory;
mod mask;
mod rules;
mod verdict;

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::audit::{AuditCategory, AuditEvent, AuditTrail, Severity};
use crate::config::ValidatorConfig;
use crate::error::{AdvisoryError, ConfigurationError, IsolationViolation};
use crate::tenant::{SchemaNaming, TenantContext, TenantId};

pub use advisory::{AdvisoryRiskScorer, HeuristicRiskScorer, RiskAssessment, RiskContext};
pub use mask::QueryMasker;
pub use verdict::{AdvisoryOutcome, ReasonCode, ValidationVerdict};

use rules::RuleSet;

/// Validates queries against tenant isolation rules.
pub struct IsolationValidator {
    config: ValidatorConfig,
    naming: SchemaNaming,
    rules: RuleSet,
    masker: QueryMasker,
    advisory: Option<Arc<dyn AdvisoryRiskScorer>>,
    audit: AuditTrail,
}

impl std::fmt::Debug for IsolationValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolationValidator")
            .field("config", &self.config)
            .field("rules", &self.rules)
            .field("advisory", &self.advisory.as_ref().map(|a| a.name().to_string()))
            .finish()
    }
}

impl IsolationValidator {
    /// Compiles the rule tables.
    pub fn new(
        config: ValidatorConfig,
        naming: SchemaNaming,
        audit: AuditTrail,
    ) -> Result<Self, ConfigurationError> {
        Ok(Self {
            rules: RuleSet::compile(&config)?,
            masker: QueryMasker::new(config.max_logged_query_length)?,
            config,
            naming,
            advisory: None,
            audit,
        })
    }

    /// Adds an advisory scorer.
    pub fn with_advisory(mut self, scorer: Arc<dyn AdvisoryRiskScorer>) -> Self {
        self.advisory = Some(scorer);
        self
    }

    /// Returns the validator configuration.
    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Returns the masker used for audit events.
    pub fn masker(&self) -> &QueryMasker {
        &self.masker
    }

    /// Runs the static rules only.
    pub fn validate_static(
        &self,
        query: &str,
        tenant_id: Option<&TenantId>,
        is_system: bool,
    ) -> ValidationVerdict {
        if !is_system && tenant_id.is_none() {
            return ValidationVerdict::deny(
                ReasonCode::TenantContextRequired,
                Severity::High,
                "context.required",
            );
        }
        if query.trim().is_empty() {
            return ValidationVerdict::deny(
                ReasonCode::EvaluationError,
                Severity::High,
                "evaluation.empty_query",
            );
        }
        if query.len() > self.config.max_query_length {
            return ValidationVerdict::deny(
                ReasonCode::EvaluationError,
                Severity::High,
                "evaluation.query_too_long",
            );
        }

        let own_schema = match tenant_id.filter(|_| !is_system) {
            Some(id) => match self.naming.schema_for(id) {
                Ok(schema) => Some(schema),
                Err(e) => {
                    debug!(tenant_id = %id, error = %e, "Could not derive tenant schema");
                    return ValidationVerdict::deny(
                        ReasonCode::EvaluationError,
                        Severity::High,
                        "evaluation.tenant_schema",
                    );
                }
            },
            None => None,
        };

        self.rules.evaluate(
            query,
            own_schema.as_ref().map(|s| s.as_str()),
            is_system,
            &self.naming,
        )
    }

    /// Validates a query: static rules, then the advisory consult.
    ///
    /// Denials and advisory findings are audited with the masked query.
    pub async fn validate_query(
        &self,
        query: &str,
        tenant_id: Option<&TenantId>,
        is_system: bool,
    ) -> ValidationVerdict {
        let mut verdict = self.validate_static(query, tenant_id, is_system);

        if verdict.allowed {
            verdict = self.consult_advisory(query, tenant_id, is_system, verdict).await;
        }

        if verdict.needs_audit() {
            self.audit_verdict(query, tenant_id, is_system, &verdict);
        }
        verdict
    }

    /// Validates a query for `ctx` and converts a denial into an error.
    pub async fn check(
        &self,
        query: &str,
        ctx: &TenantContext,
        is_system: bool,
    ) -> Result<ValidationVerdict, IsolationViolation> {
        let is_system = is_system || ctx.is_system();
        self.validate_query(query, ctx.tenant_id(), is_system)
            .await
            .into_result(ctx.tenant_id())
    }

    async fn consult_advisory(
        &self,
        query: &str,
        tenant_id: Option<&TenantId>,
        is_system: bool,
        mut verdict: ValidationVerdict,
    ) -> ValidationVerdict {
        let scorer = match (&self.advisory, self.config.advisory_enabled) {
            (Some(scorer), true) => Arc::clone(scorer),
            _ => return verdict,
        };

        let context = RiskContext {
            tenant_id: tenant_id.cloned(),
            is_system,
            masked_query: self.masker.mask(query),
            query_length: query.len(),
            statement_verb: query
                .split_whitespace()
                .next()
                .map(|verb| verb.to_lowercase()),
            referenced_schemas: self.rules.referenced_schemas(query),
        };

        let started = Instant::now();
        let scorer_name = scorer.name().to_string();
        let mut handle = tokio::spawn(async move { scorer.score(&context).await });

        let outcome = match tokio::time::timeout(self.config.advisory_timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(AdvisoryError::Failed {
                scorer: scorer_name.clone(),
                message: join_error.to_string(),
            }),
            Err(_) => {
                handle.abort();
                Err(AdvisoryError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                })
            }
        };

        match outcome {
            Ok(assessment) if assessment.secure => {
                verdict.advisory = AdvisoryOutcome::Passed {
                    confidence: assessment.confidence,
                };
            }
            Ok(assessment) => {
                let severity = assessment.severity();
                let advisory = AdvisoryOutcome::Flagged {
                    issue_type: assessment.issue_type.clone(),
                    confidence: assessment.confidence,
                    severity,
                };
                if severity >= self.config.advisory_deny_severity {
                    verdict = ValidationVerdict::deny(
                        ReasonCode::AdvisoryDenied,
                        severity,
                        "advisory.denied",
                    );
                } else {
                    verdict.reason = ReasonCode::AdvisoryFlagged;
                    verdict.severity = severity;
                }
                verdict.advisory = advisory;
            }
            Err(error) => {
                warn!(scorer = %scorer_name, error = %error, "Advisory unavailable, allowing query");
                verdict.reason = ReasonCode::AdvisoryUnavailable;
                verdict.severity = self.config.advisory_failure_severity;
                verdict.advisory = AdvisoryOutcome::Unavailable {
                    error: error.to_string(),
                };
            }
        }
        verdict
    }

    fn audit_verdict(
        &self,
        query: &str,
        tenant_id: Option<&TenantId>,
        is_system: bool,
        verdict: &ValidationVerdict,
    ) {
        let event_type = match (&verdict.advisory, verdict.allowed) {
            (_, false) => "query_denied",
            (AdvisoryOutcome::Unavailable { .. }, true) => "advisory_unavailable",
            _ => "query_flagged",
        };

        if !verdict.allowed {
            warn!(
                tenant_id = ?tenant_id.map(TenantId::as_str),
                reason = %verdict.reason,
                rule = ?verdict.matched_rule,
                "Query denied by isolation validator"
            );
        }

        let mut event = AuditEvent::new(AuditCategory::Security, event_type, verdict.severity)
            .with_tenant(tenant_id)
            .with_detail("rule", verdict.reason.as_str())
            .with_detail("query", self.masker.mask(query))
            .with_detail("is_system", is_system);
        if let Some(rule) = verdict.matched_rule {
            event = event.with_detail("matched_rule", rule);
        }
        if let Ok(advisory) = serde_json::to_value(&verdict.advisory) {
            event = event.with_detail("advisory", advisory);
        }
        self.audit.record(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::config::SchemaConfig;
    use async_trait::async_trait;
    use std::time::Duration;

    struct FixedScorer(Result<RiskAssessment, AdvisoryError>);

    #[async_trait]
    impl AdvisoryRiskScorer for FixedScorer {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn score(&self, _context: &RiskContext) -> Result<RiskAssessment, AdvisoryError> {
            self.0.clone()
        }
    }

    fn validator(sink: Arc<MemoryAuditSink>) -> IsolationValidator {
        let naming = SchemaNaming::new(&SchemaConfig::default()).unwrap();
        IsolationValidator::new(ValidatorConfig::default(), naming, AuditTrail::new(sink)).unwrap()
    }

    #[test]
    fn test_tenant_context_required() {
        let v = validator(Arc::new(MemoryAuditSink::new()));
        let verdict = v.validate_static("SELECT 1", None, false);
        assert_eq!(verdict.reason, ReasonCode::TenantContextRequired);
    }

    #[test]
    fn test_empty_and_oversized_queries() {
        let v = validator(Arc::new(MemoryAuditSink::new()));
        let acme = TenantId::new("acme");
        assert_eq!(
            v.validate_static("   ", Some(&acme), false).reason,
            ReasonCode::EvaluationError
        );
        let long = format!("SELECT '{}'", "x".repeat(100_001));
        assert_eq!(
            v.validate_static(&long, Some(&acme), false).matched_rule,
            Some("evaluation.query_too_long")
        );
    }

    #[tokio::test]
    async fn test_denial_is_audited_with_masked_query() {
        let sink = Arc::new(MemoryAuditSink::new());
        let v = validator(sink.clone());
        let alpha = TenantId::new("alpha");

        let verdict = v
            .validate_query(
                "SELECT * FROM tenant_beta.users WHERE password = 'hunter2'",
                Some(&alpha),
                false,
            )
            .await;
        assert!(verdict.is_denied());

        let events = sink.events_of("query_denied");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].detail("rule").unwrap(), "CROSS_TENANT_ACCESS");
        assert_eq!(events[0].severity, Severity::Critical);
        let logged = events[0].detail("query").unwrap().as_str().unwrap();
        assert!(!logged.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_advisory_deny_above_threshold() {
        let sink = Arc::new(MemoryAuditSink::new());
        let v = validator(sink.clone()).with_advisory(Arc::new(FixedScorer(Ok(
            RiskAssessment::insecure("exfiltration", 0.95),
        ))));

        let verdict = v
            .validate_query("SELECT * FROM users", Some(&TenantId::new("acme")), false)
            .await;
        assert_eq!(verdict.reason, ReasonCode::AdvisoryDenied);
        assert_eq!(verdict.severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_advisory_flag_below_threshold_allows() {
        let sink = Arc::new(MemoryAuditSink::new());
        let v = validator(sink.clone()).with_advisory(Arc::new(FixedScorer(Ok(
            RiskAssessment::insecure("wide_scan", 0.5),
        ))));

        let verdict = v
            .validate_query("SELECT * FROM users", Some(&TenantId::new("acme")), false)
            .await;
        assert!(verdict.allowed);
        assert_eq!(verdict.reason, ReasonCode::AdvisoryFlagged);
        assert_eq!(sink.events_of("query_flagged").len(), 1);
    }

    #[tokio::test]
    async fn test_advisory_failure_allows_with_flag() {
        let sink = Arc::new(MemoryAuditSink::new());
        let v = validator(sink.clone()).with_advisory(Arc::new(FixedScorer(Err(
            AdvisoryError::Failed {
                scorer: "fixed".to_string(),
                message: "connection refused".to_string(),
            },
        ))));

        let verdict = v
            .validate_query("SELECT * FROM users", Some(&TenantId::new("acme")), false)
            .await;
        assert!(verdict.allowed);
        assert_eq!(verdict.reason, ReasonCode::AdvisoryUnavailable);
        assert!(matches!(verdict.advisory, AdvisoryOutcome::Unavailable { .. }));
        assert_eq!(sink.events_of("advisory_unavailable").len(), 1);
    }

    #[tokio::test]
    async fn test_static_denial_skips_advisory() {
        let sink = Arc::new(MemoryAuditSink::new());
        let v = validator(sink).with_advisory(Arc::new(FixedScorer(Ok(RiskAssessment::secure(
            1.0,
        )))));

        let verdict = v
            .validate_query("SELECT 1 UNION SELECT NULL", Some(&TenantId::new("acme")), false)
            .await;
        assert_eq!(verdict.reason, ReasonCode::InjectionSignature);
        assert_eq!(verdict.advisory, AdvisoryOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_disabled_advisory_is_skipped() {
        let naming = SchemaNaming::new(&SchemaConfig::default()).unwrap();
        let v = IsolationValidator::new(
            ValidatorConfig::default()
                .without_advisory()
                .with_advisory_timeout(Duration::from_millis(10)),
            naming,
            AuditTrail::local(),
        )
        .unwrap()
        .with_advisory(Arc::new(FixedScorer(Ok(RiskAssessment::insecure("x", 1.0)))));

        let verdict = v
            .validate_query("SELECT * FROM users", Some(&TenantId::new("acme")), false)
            .await;
        assert_eq!(verdict, ValidationVerdict::allow());
    }

    #[tokio::test]
    async fn test_check_converts_denial() {
        let v = validator(Arc::new(MemoryAuditSink::new()));
        let ctx = TenantContext::for_tenant(TenantId::new("alpha"), crate::tenant::TenantSource::Header);
        let err = v
            .check("TRUNCATE users", &ctx, false)
            .await
            .unwrap_err();
        assert_eq!(err.reason, ReasonCode::DestructiveOperation);
        assert_eq!(err.to_string(), "access denied");
    }
}
