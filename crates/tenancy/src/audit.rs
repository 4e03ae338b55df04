//! Audit trail for security, system and business events.
//!
//! Recording is fire-and-forget: [`AuditTrail`] never returns an error to its
//! caller. Events go to the primary [`AuditSink`] when one is configured; if it
//! is missing or fails, they are written to the local [`TracingAuditSink`].

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::error::AuditError;
use crate::tenant::{TenantContext, TenantId};

/// Severity of an audit event or validator finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Routine lifecycle activity.
    Info,
    /// Unusual but harmless.
    Low,
    /// Rejected operation or recoverable failure.
    Medium,
    /// Security-relevant denial or failed provisioning.
    High,
    /// Attempted isolation breach or unusable system schema.
    Critical,
}

impl Severity {
    /// Returns the next higher severity, saturating at `Critical`.
    pub fn escalate(self) -> Severity {
        match self {
            Severity::Info => Severity::Low,
            Severity::Low => Severity::Medium,
            Severity::Medium => Severity::High,
            Severity::High | Severity::Critical => Severity::Critical,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Audit event category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    /// Denials, cross-tenant attempts and destructive operations.
    Security,
    /// Bootstrap, integrity and infrastructure failures.
    System,
    /// Tenant lifecycle milestones.
    Business,
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditCategory::Security => write!(f, "security"),
            AuditCategory::System => write!(f, "system"),
            AuditCategory::Business => write!(f, "business"),
        }
    }
}

/// A structured audit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event category.
    pub category: AuditCategory,
    /// Short snake_case name, e.g. `schema_created`.
    pub event_type: String,
    /// Event severity.
    pub severity: Severity,
    /// Tenant the event concerns, if any.
    pub tenant_id: Option<TenantId>,
    /// Correlation id of the originating request.
    pub correlation_id: Option<String>,
    /// Free-form structured details.
    pub details: Map<String, Value>,
    /// When the event was created.
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    /// Creates an event with no details.
    pub fn new(category: AuditCategory, event_type: impl Into<String>, severity: Severity) -> Self {
        Self {
            category,
            event_type: event_type.into(),
            severity,
            tenant_id: None,
            correlation_id: None,
            details: Map::new(),
            occurred_at: Utc::now(),
        }
    }

    /// Attaches the tenant and correlation id of a request context.
    pub fn for_context(mut self, ctx: &TenantContext) -> Self {
        self.tenant_id = ctx.tenant_id().cloned();
        self.correlation_id = Some(ctx.correlation_id().to_string());
        self
    }

    /// Attaches a tenant.
    pub fn with_tenant(mut self, tenant_id: Option<&TenantId>) -> Self {
        self.tenant_id = tenant_id.cloned();
        self
    }

    /// Adds one detail field.
    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    /// Merges the fields of a JSON object into the details.
    ///
    /// Non-object values are stored under `"detail"`.
    pub fn with_details(mut self, details: Value) -> Self {
        match details {
            Value::Object(map) => self.details.extend(map),
            Value::Null => {}
            other => {
                self.details.insert("detail".to_string(), other);
            }
        }
        self
    }

    /// Returns a detail field.
    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }
}

/// A destination for audit events.
///
/// Implementations must not block: a sink that forwards to a remote service
/// should hand events off (e.g. over a channel) and return. A sink that
/// panics is treated like one that failed.
pub trait AuditSink: Send + Sync {
    /// Returns the sink name used in diagnostics.
    fn name(&self) -> &str;

    /// Records one event.
    fn try_record(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// Fire-and-forget front end over a primary sink with a local fallback.
#[derive(Clone)]
pub struct AuditTrail {
    primary: Option<Arc<dyn AuditSink>>,
    fallback: TracingAuditSink,
}

impl fmt::Debug for AuditTrail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditTrail")
            .field("primary", &self.primary.as_ref().map(|s| s.name().to_string()))
            .finish_non_exhaustive()
    }
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::local()
    }
}

impl AuditTrail {
    /// Creates a trail writing to `primary`, falling back to tracing.
    pub fn new(primary: Arc<dyn AuditSink>) -> Self {
        Self {
            primary: Some(primary),
            fallback: TracingAuditSink,
        }
    }

    /// Creates a trail writing only to the local tracing sink.
    pub fn local() -> Self {
        Self {
            primary: None,
            fallback: TracingAuditSink,
        }
    }

    /// Records an event. Never fails and never panics.
    pub fn record(&self, event: AuditEvent) {
        if let Some(primary) = &self.primary {
            match catch_unwind(AssertUnwindSafe(|| primary.try_record(&event))) {
                Ok(Ok(())) => return,
                Ok(Err(e)) => {
                    tracing::warn!(
                        sink = primary.name(),
                        error = %e,
                        "Primary audit sink failed, using local fallback"
                    );
                }
                Err(_) => {
                    tracing::error!(
                        sink = primary.name(),
                        "Primary audit sink panicked, using local fallback"
                    );
                }
            }
        }
        // The tracing sink cannot fail.
        let _ = self.fallback.try_record(&event);
    }

    /// Records a security event.
    pub fn log_security_event(&self, event_type: &str, severity: Severity, details: Value) {
        self.record(AuditEvent::new(AuditCategory::Security, event_type, severity).with_details(details));
    }

    /// Records a system event.
    pub fn log_system_event(&self, event_type: &str, severity: Severity, details: Value) {
        self.record(AuditEvent::new(AuditCategory::System, event_type, severity).with_details(details));
    }

    /// Records a business event.
    pub fn log_business_event(&self, event_type: &str, details: Value) {
        self.record(
            AuditEvent::new(AuditCategory::Business, event_type, Severity::Info).with_details(details),
        );
    }
}

/// Writes audit events as `tracing` events on the `audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn name(&self) -> &str {
        "tracing"
    }

    fn try_record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let details = Value::Object(event.details.clone());
        let tenant = event.tenant_id.as_ref().map(TenantId::as_str).unwrap_or("-");
        let correlation = event.correlation_id.as_deref().unwrap_or("-");

        match event.severity {
            Severity::Critical | Severity::High => tracing::error!(
                target: "audit",
                category = %event.category,
                event_type = %event.event_type,
                severity = %event.severity,
                tenant_id = tenant,
                correlation_id = correlation,
                details = %details,
                "audit event"
            ),
            Severity::Medium | Severity::Low => tracing::warn!(
                target: "audit",
                category = %event.category,
                event_type = %event.event_type,
                severity = %event.severity,
                tenant_id = tenant,
                correlation_id = correlation,
                details = %details,
                "audit event"
            ),
            Severity::Info => tracing::info!(
                target: "audit",
                category = %event.category,
                event_type = %event.event_type,
                severity = %event.severity,
                tenant_id = tenant,
                correlation_id = correlation,
                details = %details,
                "audit event"
            ),
        }
        Ok(())
    }
}

/// Hands events to an async consumer over a bounded channel.
///
/// A full or closed channel is reported as unavailable, so the trail falls
/// back to local logging instead of blocking.
#[derive(Debug, Clone)]
pub struct ChannelAuditSink {
    sender: mpsc::Sender<AuditEvent>,
}

impl ChannelAuditSink {
    /// Creates a sink and the receiver its events are delivered to.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AuditEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl AuditSink for ChannelAuditSink {
    fn name(&self) -> &str {
        "channel"
    }

    fn try_record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        self.sender
            .try_send(event.clone())
            .map_err(|_| AuditError::Unavailable {
                sink: self.name().to_string(),
            })
    }
}

/// Keeps events in memory. Useful for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all recorded events.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Returns the recorded events of one type.
    pub fn events_of(&self, event_type: &str) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Returns the number of recorded events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Removes all recorded events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl AuditSink for MemoryAuditSink {
    fn name(&self) -> &str {
        "memory"
    }

    fn try_record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}
