//! Advisory risk scoring.
//!
//! An advisory scorer is consulted after the static rules allow a query. It
//! can deny a query the rules missed, but it cannot overturn a static denial,
//! and its failure never blocks a query.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::audit::Severity;
use crate::error::{AdvisoryError, ConfigurationError};
use crate::tenant::TenantId;

/// What an advisory scorer gets to see.
///
/// The query text is masked before it leaves the validator.
#[derive(Debug, Clone, Serialize)]
pub struct RiskContext {
    /// Tenant the query runs for.
    pub tenant_id: Option<TenantId>,
    /// True for system operations.
    pub is_system: bool,
    /// Query text with literals masked.
    pub masked_query: String,
    /// Length of the original query in bytes.
    pub query_length: usize,
    /// First keyword of the query, lowercased.
    pub statement_verb: Option<String>,
    /// Schemas named by qualified identifiers.
    pub referenced_schemas: Vec<String>,
}

/// A scorer's judgement of one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// False raises a finding.
    pub secure: bool,
    /// Scorer-defined issue label.
    pub issue_type: Option<String>,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
}

impl RiskAssessment {
    /// A clean assessment.
    pub fn secure(confidence: f32) -> Self {
        Self {
            secure: true,
            issue_type: None,
            confidence,
        }
    }

    /// A finding of `issue_type` at `confidence`.
    pub fn insecure(issue_type: impl Into<String>, confidence: f32) -> Self {
        Self {
            secure: false,
            issue_type: Some(issue_type.into()),
            confidence,
        }
    }

    /// Maps confidence onto a severity.
    pub fn severity(&self) -> Severity {
        match self.confidence {
            c if c >= 0.9 => Severity::Critical,
            c if c >= 0.7 => Severity::High,
            c if c >= 0.4 => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

/// A pluggable advisory scorer.
#[async_trait]
pub trait AdvisoryRiskScorer: Send + Sync {
    /// Name used in audit events.
    fn name(&self) -> &str;

    /// Scores one query. Callers bound this with a timeout.
    async fn score(&self, context: &RiskContext) -> Result<RiskAssessment, AdvisoryError>;
}

/// A local scorer built from weighted heuristics.
///
/// Each signal adds to a score capped at 1.0; a score below 0.5 is secure.
#[derive(Debug)]
pub struct HeuristicRiskScorer {
    or_chain: Regex,
    hex_literal: Regex,
    char_encoding: Regex,
    long_query: usize,
}

impl HeuristicRiskScorer {
    /// Creates the scorer. Queries longer than `long_query` are suspicious.
    pub fn new(long_query: usize) -> Result<Self, ConfigurationError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|source| ConfigurationError::InvalidPattern {
                field: "validator.heuristics",
                source,
            })
        };
        Ok(Self {
            or_chain: compile(r"(?i)\bor\b")?,
            hex_literal: compile(r"(?i)\b0x[0-9a-f]{4,}\b|\\x[0-9a-f]{2}")?,
            char_encoding: compile(r"(?i)\b(chr|char|ascii|convert_from|decode)\s*\(")?,
            long_query,
        })
    }

    fn signals(&self, context: &RiskContext) -> Vec<(&'static str, f32)> {
        let query = context.masked_query.as_str();
        let mut signals = Vec::new();

        if context.query_length > self.long_query {
            signals.push(("oversized_query", 0.2));
        }
        if self.or_chain.find_iter(query).count() >= 5 {
            signals.push(("or_chain", 0.3));
        }
        if self.hex_literal.is_match(query) {
            signals.push(("encoded_literal", 0.3));
        }
        if self.char_encoding.find_iter(query).count() >= 2 {
            signals.push(("character_encoding", 0.4));
        }
        if !context.is_system
            && context
                .referenced_schemas
                .iter()
                .any(|s| s.eq_ignore_ascii_case("public"))
        {
            signals.push(("public_schema_reference", 0.2));
        }
        signals
    }
}

#[async_trait]
impl AdvisoryRiskScorer for HeuristicRiskScorer {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn score(&self, context: &RiskContext) -> Result<RiskAssessment, AdvisoryError> {
        let signals = self.signals(context);
        let score: f32 = signals.iter().map(|(_, w)| w).sum::<f32>().min(1.0);

        if score < 0.5 {
            return Ok(RiskAssessment::secure(1.0 - score));
        }

        let strongest = signals
            .iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(name, _)| *name)
            .unwrap_or("heuristic");
        Ok(RiskAssessment::insecure(strongest, score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(query: &str) -> RiskContext {
        RiskContext {
            tenant_id: Some(TenantId::new("acme")),
            is_system: false,
            masked_query: query.to_string(),
            query_length: query.len(),
            statement_verb: Some("select".to_string()),
            referenced_schemas: Vec::new(),
        }
    }

    #[test]
    fn test_severity_mapping() {
        assert_eq!(RiskAssessment::insecure("x", 0.95).severity(), Severity::Critical);
        assert_eq!(RiskAssessment::insecure("x", 0.7).severity(), Severity::High);
        assert_eq!(RiskAssessment::insecure("x", 0.5).severity(), Severity::Medium);
        assert_eq!(RiskAssessment::insecure("x", 0.1).severity(), Severity::Low);
    }

    #[tokio::test]
    async fn test_plain_query_is_secure() {
        let scorer = HeuristicRiskScorer::new(10_000).unwrap();
        let result = scorer
            .score(&context("SELECT id FROM users WHERE id = $1"))
            .await
            .unwrap();
        assert!(result.secure);
    }

    #[tokio::test]
    async fn test_or_chain_with_encoding_is_flagged() {
        let scorer = HeuristicRiskScorer::new(10_000).unwrap();
        let query = "SELECT * FROM users WHERE a = 1 OR b = 2 OR c = 3 OR d = 4 OR e = 5 \
                     OR f = convert_from(decode('x', 'hex'), 'UTF8')";
        let result = scorer.score(&context(query)).await.unwrap();
        assert!(!result.secure);
        assert_eq!(result.issue_type.as_deref(), Some("character_encoding"));
        assert!(result.confidence >= 0.5);
    }

    #[tokio::test]
    async fn test_oversized_query_alone_is_secure() {
        let scorer = HeuristicRiskScorer::new(10).unwrap();
        let result = scorer
            .score(&context("SELECT id FROM customers"))
            .await
            .unwrap();
        assert!(result.secure);
    }
}
