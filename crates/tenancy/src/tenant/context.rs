//! Per-request tenant context.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::audit::Severity;
use crate::error::IsolationViolation;
use crate::validator::ReasonCode;

use super::id::TenantId;
use super::source::TenantSource;

/// Whom an operation runs for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "tenant_id", rename_all = "snake_case")]
pub enum TenantScope {
    /// A single tenant.
    Tenant(TenantId),
    /// The platform itself; not scoped to any tenant.
    System,
}

/// How an access check was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessGrant {
    /// The context owns the requested tenant.
    Owner,
    /// The context is a system context. Callers audit these as a caution.
    System,
}

/// The resolved tenant context of one request or operation.
///
/// Contexts are produced fresh per request by the resolver and are never
/// shared between requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    scope: TenantScope,
    source: TenantSource,
    correlation_id: String,
    client_ip: Option<IpAddr>,
    user_id: Option<String>,
}

impl TenantContext {
    /// Creates a context for a single tenant.
    pub fn for_tenant(tenant_id: TenantId, source: TenantSource) -> Self {
        Self::with_scope(TenantScope::Tenant(tenant_id), source)
    }

    /// Creates a system context for a request carrying no tenant signal.
    pub fn system() -> Self {
        Self::with_scope(TenantScope::System, TenantSource::Default)
    }

    pub(crate) fn with_scope(scope: TenantScope, source: TenantSource) -> Self {
        Self {
            scope,
            source,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            client_ip: None,
            user_id: None,
        }
    }

    /// Sets the correlation id used to tie audit events to a request.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }

    /// Sets the client address the request came from.
    pub fn with_client_ip(mut self, ip: Option<IpAddr>) -> Self {
        self.client_ip = ip;
        self
    }

    /// Sets the authenticated user.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Returns the scope.
    pub fn scope(&self) -> &TenantScope {
        &self.scope
    }

    /// Returns the tenant, or `None` for a system context.
    pub fn tenant_id(&self) -> Option<&TenantId> {
        match &self.scope {
            TenantScope::Tenant(id) => Some(id),
            TenantScope::System => None,
        }
    }

    /// Returns true for a system context.
    pub fn is_system(&self) -> bool {
        matches!(self.scope, TenantScope::System)
    }

    /// Returns true if a trusted caller installed this context.
    pub fn is_forced(&self) -> bool {
        self.source == TenantSource::Forced
    }

    /// Returns the source the context was resolved from.
    pub fn source(&self) -> TenantSource {
        self.source
    }

    /// Returns the correlation id.
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Returns the client address, if known.
    pub fn client_ip(&self) -> Option<IpAddr> {
        self.client_ip
    }

    /// Returns the authenticated user, if any.
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Checks whether this context may act on `requested`.
    ///
    /// System contexts always pass. Tenant contexts pass only for their own
    /// tenant; a mismatch is a cross-tenant access attempt.
    pub fn check_access(&self, requested: &TenantId) -> Result<AccessGrant, IsolationViolation> {
        match &self.scope {
            TenantScope::System => Ok(AccessGrant::System),
            TenantScope::Tenant(own) if own == requested => Ok(AccessGrant::Owner),
            TenantScope::Tenant(own) => Err(IsolationViolation::new(
                ReasonCode::CrossTenantAccess,
                Severity::Critical,
            )
            .with_rule("context.tenant_mismatch")
            .with_tenant(Some(own.clone()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_context() {
        let ctx = TenantContext::for_tenant(TenantId::new("acme"), TenantSource::Header);
        assert_eq!(ctx.tenant_id(), Some(&TenantId::new("acme")));
        assert!(!ctx.is_system());
        assert!(!ctx.is_forced());
        assert_eq!(ctx.source(), TenantSource::Header);
    }

    #[test]
    fn test_system_context() {
        let ctx = TenantContext::system();
        assert!(ctx.is_system());
        assert!(ctx.tenant_id().is_none());
        assert!(ctx.source().is_default());
    }

    #[test]
    fn test_contexts_get_fresh_correlation_ids() {
        let a = TenantContext::system();
        let b = TenantContext::system();
        assert_ne!(a.correlation_id(), b.correlation_id());

        let c = a.with_correlation_id("req-1").with_user_id("u-42");
        assert_eq!(c.correlation_id(), "req-1");
        assert_eq!(c.user_id(), Some("u-42"));
    }

    #[test]
    fn test_check_access_same_tenant() {
        let ctx = TenantContext::for_tenant(TenantId::new("acme"), TenantSource::Header);
        assert_eq!(
            ctx.check_access(&TenantId::new("ACME")),
            Ok(AccessGrant::Owner)
        );
    }

    #[test]
    fn test_check_access_system_always_passes() {
        let ctx = TenantContext::system();
        assert_eq!(
            ctx.check_access(&TenantId::new("anything")),
            Ok(AccessGrant::System)
        );
    }

    #[test]
    fn test_check_access_mismatch() {
        let ctx = TenantContext::for_tenant(TenantId::new("alpha"), TenantSource::Header);
        let err = ctx.check_access(&TenantId::new("beta")).unwrap_err();
        assert_eq!(err.reason, ReasonCode::CrossTenantAccess);
        assert_eq!(err.severity, Severity::Critical);
        assert_eq!(err.tenant_id, Some(TenantId::new("alpha")));
    }

    #[test]
    fn test_scope_serialization() {
        let json = serde_json::to_value(TenantScope::Tenant(TenantId::new("acme"))).unwrap();
        assert_eq!(json["scope"], "tenant");
        assert_eq!(json["tenant_id"], "acme");
    }
}
