//! Rate limit policies and per-resource policy resolution.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default requests-per-minute limit when no policy is configured.
const DEFAULT_PER_MINUTE: u32 = 120;
/// Default requests-per-hour limit when no policy is configured.
const DEFAULT_PER_HOUR: u32 = 2000;
/// Default burst limit when no policy is configured.
const DEFAULT_BURST_LIMIT: u32 = 20;
/// Default burst window in seconds when no policy is configured.
const DEFAULT_BURST_WINDOW_SECS: u32 = 10;

/// Thresholds applied to a single resource.
///
/// Policies are operator-supplied configuration, validated at load time by
/// the configuration loader. The admission path assumes every field is
/// greater than zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Maximum requests allowed in any trailing 60 seconds
    pub requests_per_minute: u32,
    /// Maximum requests allowed in any trailing hour
    pub requests_per_hour: u32,
    /// Maximum requests allowed in the burst window
    pub burst_limit: u32,
    /// Length of the burst window in seconds
    pub burst_window_seconds: u32,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            requests_per_minute: DEFAULT_PER_MINUTE,
            requests_per_hour: DEFAULT_PER_HOUR,
            burst_limit: DEFAULT_BURST_LIMIT,
            burst_window_seconds: DEFAULT_BURST_WINDOW_SECS,
        }
    }
}

impl RateLimitPolicy {
    /// The burst window as a [`Duration`].
    pub fn burst_window(&self) -> Duration {
        Duration::from_secs(u64::from(self.burst_window_seconds))
    }

    /// Check the policy field invariants.
    ///
    /// Every threshold must be greater than zero. Returns a description of
    /// the first violated invariant.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.requests_per_minute == 0 {
            return Err("requests_per_minute must be greater than zero".to_string());
        }
        if self.requests_per_hour == 0 {
            return Err("requests_per_hour must be greater than zero".to_string());
        }
        if self.burst_limit == 0 {
            return Err("burst_limit must be greater than zero".to_string());
        }
        if self.burst_window_seconds == 0 {
            return Err("burst_window_seconds must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Maps resource identifiers (normalized request paths) to policies.
///
/// Registration happens once at startup. Every resource resolves to some
/// policy: an exact match if the resource was registered, otherwise the
/// configured default.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    /// Policy applied to unregistered resources
    default: RateLimitPolicy,
    /// Exact-match policies keyed by resource path
    resources: HashMap<String, RateLimitPolicy>,
}

impl PolicyRegistry {
    /// Create a registry with the given default policy and no resource
    /// overrides.
    pub fn new(default: RateLimitPolicy) -> Self {
        Self {
            default,
            resources: HashMap::new(),
        }
    }

    /// Register a policy for a specific resource, replacing any previous
    /// registration.
    pub fn register(&mut self, resource: impl Into<String>, policy: RateLimitPolicy) {
        self.resources.insert(resource.into(), policy);
    }

    /// Resolve the policy for a resource. Never fails.
    pub fn resolve(&self, resource: &str) -> RateLimitPolicy {
        self.resources.get(resource).copied().unwrap_or(self.default)
    }

    /// Number of registered resource overrides.
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::new(RateLimitPolicy::default())
    }
}
