//! Tenant source identification.
//!
//! Defines the request signals a tenant identity can be resolved from.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Source from which a tenant context was resolved.
///
/// Sources are listed in priority order (highest to lowest):
/// 1. Explicit tenant header (`tenant-id`, `x-tenant-id`)
/// 2. First subdomain label under the platform base domain
/// 3. Path segment preceding the API marker (`/{tenant}/api/...`)
/// 4. No signal: system context
///
/// `Forced` marks a context installed by a trusted internal caller and sits
/// outside the request priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantSource {
    /// Explicit tenant header (highest priority).
    Header,
    /// Subdomain of the platform base domain.
    Subdomain,
    /// Path prefix before the API marker.
    PathPrefix,
    /// No tenant signal was present.
    Default,
    /// Installed by a trusted internal override.
    Forced,
}

impl TenantSource {
    /// Returns the priority of this source (higher = more authoritative).
    pub fn priority(&self) -> u8 {
        match self {
            TenantSource::Forced => 5,
            TenantSource::Header => 4,
            TenantSource::Subdomain => 3,
            TenantSource::PathPrefix => 2,
            TenantSource::Default => 1,
        }
    }

    /// Returns true if this source is derived from the request target.
    pub fn is_url_based(&self) -> bool {
        matches!(self, TenantSource::Subdomain | TenantSource::PathPrefix)
    }

    /// Returns true if no tenant signal was present.
    pub fn is_default(&self) -> bool {
        matches!(self, TenantSource::Default)
    }
}

impl fmt::Display for TenantSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TenantSource::Header => write!(f, "header"),
            TenantSource::Subdomain => write!(f, "subdomain"),
            TenantSource::PathPrefix => write!(f, "path_prefix"),
            TenantSource::Default => write!(f, "default"),
            TenantSource::Forced => write!(f, "forced"),
        }
    }
}

impl Ord for TenantSource {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority().cmp(&other.priority())
    }
}

impl PartialOrd for TenantSource {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_priority() {
        assert!(TenantSource::Header > TenantSource::Subdomain);
        assert!(TenantSource::Subdomain > TenantSource::PathPrefix);
        assert!(TenantSource::PathPrefix > TenantSource::Default);
    }

    #[test]
    fn test_source_display() {
        assert_eq!(TenantSource::Header.to_string(), "header");
        assert_eq!(TenantSource::Subdomain.to_string(), "subdomain");
        assert_eq!(TenantSource::PathPrefix.to_string(), "path_prefix");
        assert_eq!(TenantSource::Default.to_string(), "default");
        assert_eq!(TenantSource::Forced.to_string(), "forced");
    }

    #[test]
    fn test_is_url_based() {
        assert!(TenantSource::Subdomain.is_url_based());
        assert!(TenantSource::PathPrefix.is_url_based());
        assert!(!TenantSource::Header.is_url_based());
        assert!(!TenantSource::Default.is_url_based());
    }
}
