//! Tenant resolution from request metadata.
//!
//! Provides the [`TenantResolver`], which derives a [`TenantContext`] from a
//! request's headers, host and path. The first source that yields a tenant
//! wins:
//!
//! 1. an explicit tenant header
//! 2. the first subdomain label under the configured base domain
//! 3. the path segment preceding the API marker (`/{tenant}/api/...`)
//!
//! A request with none of these resolves to a system context.

use std::backtrace::Backtrace;
use std::net::{IpAddr, SocketAddr};

use http::header::HOST;
use http::request::Parts;
use serde_json::json;
use tracing::{debug, warn};

use crate::audit::{AuditCategory, AuditEvent, AuditTrail, Severity};
use crate::config::ResolverConfig;
use crate::error::IsolationViolation;
use crate::tenant::{AccessGrant, TenantContext, TenantId, TenantScope, TenantSource};
use crate::validator::ReasonCode;

/// Maximum number of characters of a stack capture kept in audit events.
const MAX_STACK_CAPTURE: usize = 4096;

/// Result of resolving a tenant from a request.
#[derive(Debug, Clone)]
pub struct ResolvedTenant {
    /// The resolved context.
    pub context: TenantContext,
    /// All sources that provided a tenant ID (for validation).
    pub all_sources: Vec<(TenantSource, TenantId)>,
}

impl ResolvedTenant {
    /// Returns true if the sources named more than one tenant.
    pub fn has_conflict(&self) -> bool {
        self.all_sources
            .iter()
            .any(|(_, id)| Some(id) != self.context.tenant_id())
    }

    /// Returns the source that won.
    pub fn source(&self) -> TenantSource {
        self.context.source()
    }
}

/// Trait for extracting tenant information from a specific source.
pub trait TenantSourceExtractor: Send + Sync {
    /// Attempts to extract a tenant ID from the request.
    fn extract(&self, parts: &Parts, config: &ResolverConfig) -> Option<TenantId>;

    /// Returns the source type this extractor handles.
    fn source_type(&self) -> TenantSource;
}

/// Extracts the tenant from the configured tenant headers.
///
/// Header values are taken as-is apart from trimming; schema naming sanitizes
/// them later.
#[derive(Debug, Default)]
pub struct HeaderTenantExtractor;

impl TenantSourceExtractor for HeaderTenantExtractor {
    fn extract(&self, parts: &Parts, config: &ResolverConfig) -> Option<TenantId> {
        config.tenant_headers.iter().find_map(|name| {
            parts
                .headers
                .get(name.as_str())
                .and_then(|v| v.to_str().ok())
                .and_then(|raw| TenantId::parse(raw, config.max_tenant_id_length).ok())
        })
    }

    fn source_type(&self) -> TenantSource {
        TenantSource::Header
    }
}

/// Extracts the tenant from the first label of a subdomain of the base domain.
#[derive(Debug, Default)]
pub struct SubdomainTenantExtractor;

impl TenantSourceExtractor for SubdomainTenantExtractor {
    fn extract(&self, parts: &Parts, config: &ResolverConfig) -> Option<TenantId> {
        let base = config.base_domain.as_deref()?.trim_matches('.').to_lowercase();
        let host = request_host(parts)?;

        let prefix = host.strip_suffix(base.as_str())?.strip_suffix('.')?;
        let label = prefix.split('.').next()?;

        if !is_dns_label(label)
            || config
                .reserved_subdomains
                .iter()
                .any(|r| r.eq_ignore_ascii_case(label))
        {
            return None;
        }

        TenantId::parse(label, config.max_tenant_id_length).ok()
    }

    fn source_type(&self) -> TenantSource {
        TenantSource::Subdomain
    }
}

/// Extracts the tenant from the path segment preceding the API marker.
///
/// `/acme/api/orders` resolves to `acme`.
#[derive(Debug, Default)]
pub struct PathPrefixTenantExtractor;

impl TenantSourceExtractor for PathPrefixTenantExtractor {
    fn extract(&self, parts: &Parts, config: &ResolverConfig) -> Option<TenantId> {
        let segments: Vec<&str> = parts
            .uri
            .path()
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        let marker = segments
            .iter()
            .position(|s| s.eq_ignore_ascii_case(&config.api_marker))?;
        let candidate = *segments.get(marker.checked_sub(1)?)?;

        if !is_path_tenant(candidate)
            || config
                .reserved_path_segments
                .iter()
                .any(|r| r.eq_ignore_ascii_case(candidate))
        {
            return None;
        }

        TenantId::parse(candidate, config.max_tenant_id_length).ok()
    }

    fn source_type(&self) -> TenantSource {
        TenantSource::PathPrefix
    }
}

/// Resolves tenant contexts and guards access between them.
pub struct TenantResolver {
    config: ResolverConfig,
    extractors: Vec<Box<dyn TenantSourceExtractor>>,
    audit: AuditTrail,
}

impl std::fmt::Debug for TenantResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantResolver")
            .field("config", &self.config)
            .field(
                "extractors",
                &self
                    .extractors
                    .iter()
                    .map(|e| e.source_type())
                    .collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl TenantResolver {
    /// Creates a resolver with the header, subdomain and path extractors.
    pub fn new(config: ResolverConfig, audit: AuditTrail) -> Self {
        Self::with_extractors(
            config,
            audit,
            vec![
                Box::new(HeaderTenantExtractor),
                Box::new(SubdomainTenantExtractor),
                Box::new(PathPrefixTenantExtractor),
            ],
        )
    }

    /// Creates a resolver with custom extractors, checked in the given order.
    pub fn with_extractors(
        config: ResolverConfig,
        audit: AuditTrail,
        extractors: Vec<Box<dyn TenantSourceExtractor>>,
    ) -> Self {
        Self {
            config,
            extractors,
            audit,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolves the tenant context of a request.
    pub fn resolve(&self, parts: &Parts) -> ResolvedTenant {
        let mut all_sources = Vec::new();

        for extractor in &self.extractors {
            if let Some(tenant_id) = extractor.extract(parts, &self.config) {
                all_sources.push((extractor.source_type(), tenant_id));
            }
        }

        let client_ip = client_ip(parts);
        let context = match all_sources.first() {
            Some((source, tenant_id)) => {
                TenantContext::for_tenant(tenant_id.clone(), *source)
            }
            None => TenantContext::system(),
        }
        .with_client_ip(client_ip);

        let resolved = ResolvedTenant {
            context,
            all_sources,
        };

        if resolved.has_conflict() {
            warn!(
                tenant_id = ?resolved.context.tenant_id(),
                sources = ?resolved.all_sources,
                "Request carries conflicting tenant signals; highest priority source wins"
            );
        }

        debug!(
            tenant_id = ?resolved.context.tenant_id(),
            source = %resolved.source(),
            correlation_id = resolved.context.correlation_id(),
            "Resolved tenant context"
        );

        resolved
    }

    /// Resolves only the context of a request.
    pub fn resolve_context(&self, parts: &Parts) -> TenantContext {
        self.resolve(parts).context
    }

    /// Returns whether `ctx` may act on `requested`.
    ///
    /// System contexts always pass and are audited as a caution. A mismatch
    /// is audited as a security incident with the requester, the attempted
    /// tenant, the client address and a stack capture.
    pub fn validate_access(&self, ctx: &TenantContext, requested: &TenantId) -> bool {
        match ctx.check_access(requested) {
            Ok(AccessGrant::Owner) => true,
            Ok(AccessGrant::System) => {
                self.audit.record(
                    AuditEvent::new(AuditCategory::Security, "system_context_access", Severity::Low)
                        .for_context(ctx)
                        .with_detail("requested_tenant", requested.as_str())
                        .with_detail("source", ctx.source().to_string()),
                );
                true
            }
            Err(violation) => {
                self.report_mismatch(ctx, requested, &violation);
                false
            }
        }
    }

    /// Installs a tenant context on behalf of a trusted internal caller.
    pub fn force_tenant_context(
        &self,
        caller: &str,
        tenant_id: TenantId,
        reason: &str,
    ) -> Result<TenantContext, IsolationViolation> {
        self.authorize_override(caller, Some(&tenant_id), reason)?;
        Ok(TenantContext::with_scope(
            TenantScope::Tenant(tenant_id),
            TenantSource::Forced,
        ))
    }

    /// Installs a system context on behalf of a trusted internal caller.
    pub fn force_system_context(
        &self,
        caller: &str,
        reason: &str,
    ) -> Result<TenantContext, IsolationViolation> {
        self.authorize_override(caller, None, reason)?;
        Ok(TenantContext::with_scope(
            TenantScope::System,
            TenantSource::Forced,
        ))
    }

    fn authorize_override(
        &self,
        caller: &str,
        tenant_id: Option<&TenantId>,
        reason: &str,
    ) -> Result<(), IsolationViolation> {
        let trusted = self.config.trusted_callers.iter().any(|c| c == caller);
        let override_target = tenant_id.map(TenantId::as_str).unwrap_or("system");

        let event = AuditEvent::new(
            AuditCategory::Security,
            if trusted {
                "context_override"
            } else {
                "context_override_denied"
            },
            if trusted { Severity::Medium } else { Severity::High },
        )
        .with_tenant(tenant_id)
        .with_detail("caller", caller)
        .with_detail("target", override_target)
        .with_detail("reason", reason);
        self.audit.record(event);

        if trusted {
            warn!(caller, override_target, reason, "Tenant context forced by internal caller");
            Ok(())
        } else {
            warn!(caller, override_target, "Rejected context override from untrusted caller");
            Err(IsolationViolation::new(ReasonCode::PrivilegedOperation, Severity::High)
                .with_rule("context.untrusted_override")
                .with_tenant(tenant_id.cloned()))
        }
    }

    fn report_mismatch(
        &self,
        ctx: &TenantContext,
        requested: &TenantId,
        violation: &IsolationViolation,
    ) {
        let mut stack = Backtrace::force_capture().to_string();
        if stack.len() > MAX_STACK_CAPTURE {
            let cut = (0..=MAX_STACK_CAPTURE)
                .rev()
                .find(|i| stack.is_char_boundary(*i))
                .unwrap_or(0);
            stack.truncate(cut);
        }

        warn!(
            tenant_id = ?ctx.tenant_id(),
            attempted = %requested,
            "Cross-tenant access attempt"
        );

        self.audit.record(
            AuditEvent::new(AuditCategory::Security, "cross_tenant_access", violation.severity)
                .for_context(ctx)
                .with_details(json!({
                    "requester_tenant": ctx.tenant_id().map(TenantId::as_str),
                    "attempted_tenant": requested.as_str(),
                    "client_ip": ctx.client_ip().map(|ip| ip.to_string()),
                    "user_id": ctx.user_id(),
                    "rule": violation.rule,
                    "stack": stack,
                })),
        );
    }
}

/// Returns the request host without port, lowercased.
fn request_host(parts: &Parts) -> Option<String> {
    let raw = parts
        .headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| parts.uri.host())?;

    let host = match raw.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => raw,
    };
    Some(host.trim_end_matches('.').to_lowercase())
}

/// Returns the client address from proxy headers or the connection info.
fn client_ip(parts: &Parts) -> Option<IpAddr> {
    let forwarded = parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok());

    forwarded
        .or_else(|| {
            parts
                .headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
        })
        .or_else(|| parts.extensions.get::<SocketAddr>().map(SocketAddr::ip))
}

fn is_dns_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= 63
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn is_path_tenant(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
