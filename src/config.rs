//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::warn;

use crate::admission::{PolicyRegistry, RateLimitPolicy};
use crate::error::{Result, TurnstileError};

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl Default for TurnstileConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Interval between idle-client sweeps, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:8080".parse().unwrap()
}

fn default_sweep_interval() -> u64 {
    300
}

/// Rate limiting configuration: the default policy, per-resource overrides,
/// and the paths exempt from admission control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Policy applied to resources without an override
    #[serde(default)]
    pub default: RateLimitPolicy,

    /// Per-resource policy overrides, keyed by normalized request path
    #[serde(default)]
    pub resources: HashMap<String, RateLimitPolicy>,

    /// Diagnostic paths that bypass admission control entirely
    #[serde(default = "default_exempt_paths")]
    pub exempt_paths: Vec<String>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            default: RateLimitPolicy::default(),
            resources: HashMap::new(),
            exempt_paths: default_exempt_paths(),
        }
    }
}

fn default_exempt_paths() -> Vec<String> {
    vec!["/health".to_string()]
}

impl TurnstileConfig {
    /// Load and validate configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: TurnstileConfig = serde_yaml::from_str(&contents)
            .map_err(|e| TurnstileError::Config(e.to_string()))?;
        config.limits.validate()?;
        Ok(config)
    }
}

impl LimitsConfig {
    /// Check every policy's field invariants.
    ///
    /// Malformed policies are fatal here, at load time, so the admission
    /// path can assume all policies are valid. The `burst_limit` within
    /// `requests_per_minute` recommendation is logged, not enforced.
    pub fn validate(&self) -> Result<()> {
        Self::validate_policy("default", &self.default)?;
        for (resource, policy) in &self.resources {
            Self::validate_policy(resource, policy)?;
        }
        Ok(())
    }

    fn validate_policy(name: &str, policy: &RateLimitPolicy) -> Result<()> {
        policy
            .validate()
            .map_err(|e| TurnstileError::Config(format!("policy for {}: {}", name, e)))?;

        if policy.burst_limit > policy.requests_per_minute {
            warn!(
                resource = name,
                burst_limit = policy.burst_limit,
                requests_per_minute = policy.requests_per_minute,
                "burst_limit exceeds requests_per_minute; the burst check will never fire first"
            );
        }
        Ok(())
    }

    /// Build the policy registry from this configuration.
    pub fn build_registry(&self) -> PolicyRegistry {
        let mut registry = PolicyRegistry::new(self.default);
        for (resource, policy) in &self.resources {
            registry.register(resource.clone(), *policy);
        }
        registry
    }
}
