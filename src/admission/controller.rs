//! Admission decisions across burst, minute, and hour windows.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, trace};

use super::client::ClientKey;
use super::policy::{PolicyRegistry, RateLimitPolicy};
use super::store::{EvaluationError, WindowCounts, WindowStore};
use super::window::WindowTracker;

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Too many requests inside the burst window
    BurstExceeded,
    /// Too many requests inside the trailing minute
    MinuteExceeded,
    /// Too many requests inside the trailing hour
    HourExceeded,
}

impl DenyReason {
    /// Seconds after which the client may retry.
    pub fn retry_after_seconds(&self, policy: &RateLimitPolicy) -> u64 {
        match self {
            DenyReason::BurstExceeded => u64::from(policy.burst_window_seconds),
            DenyReason::MinuteExceeded => 60,
            DenyReason::HourExceeded => 3600,
        }
    }
}

/// The outcome of an admission check.
#[derive(Debug, Clone, Copy)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Set when the request was denied
    pub reason: Option<DenyReason>,
    /// Requests left in the trailing minute, floored at zero
    pub remaining_minute: u32,
    /// Requests left in the trailing hour, floored at zero
    pub remaining_hour: u32,
    /// Seconds after which a denied client may retry; zero when allowed
    pub retry_after_seconds: u64,
    /// The policy the decision was evaluated against
    pub policy: RateLimitPolicy,
}

impl Decision {
    fn allow(policy: RateLimitPolicy, counts: WindowCounts) -> Self {
        Self {
            allowed: true,
            reason: None,
            remaining_minute: policy.requests_per_minute.saturating_sub(counts.minute + 1),
            remaining_hour: policy.requests_per_hour.saturating_sub(counts.hour + 1),
            retry_after_seconds: 0,
            policy,
        }
    }

    fn deny(policy: RateLimitPolicy, reason: DenyReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            remaining_minute: 0,
            remaining_hour: 0,
            retry_after_seconds: reason.retry_after_seconds(&policy),
            policy,
        }
    }

    /// The decision returned when evaluation itself failed: allow, with zero
    /// quota metadata. A broken limiter degrades to "no limiting", never to
    /// "reject everything".
    fn fail_open(policy: RateLimitPolicy) -> Self {
        Self {
            allowed: true,
            reason: None,
            remaining_minute: 0,
            remaining_hour: 0,
            retry_after_seconds: 0,
            policy,
        }
    }
}

/// Decides whether a request is admitted, and records it if so.
///
/// The controller is constructed once at startup and shared by reference
/// across concurrent request handlers. `check` performs no I/O, never
/// blocks, and never suspends.
pub struct AdmissionController<S: WindowStore = WindowTracker> {
    /// Per-resource policy lookup
    registry: PolicyRegistry,
    /// Per-client request histories
    store: Arc<S>,
}

impl<S: WindowStore> AdmissionController<S> {
    /// Create a new controller over the given registry and window store.
    pub fn new(registry: PolicyRegistry, store: Arc<S>) -> Self {
        Self { registry, store }
    }

    /// Decide whether to admit a request from `client` to `resource`.
    ///
    /// Checks are evaluated cheapest-window first (burst, then minute, then
    /// hour) and the first failing check wins. Denied requests are not
    /// recorded. Any internal evaluation error fails open: the request is
    /// allowed and the error is logged.
    pub fn check(&self, client: &ClientKey, resource: &str, now: Instant) -> Decision {
        let policy = self.registry.resolve(resource);

        trace!(
            client = %client,
            resource = resource,
            "Checking admission"
        );

        match self.evaluate(client, &policy, now) {
            Ok(decision) => decision,
            Err(e) => {
                error!(
                    client = %client,
                    resource = resource,
                    error = %e,
                    "Admission evaluation failed, failing open"
                );
                Decision::fail_open(policy)
            }
        }
    }

    fn evaluate(
        &self,
        client: &ClientKey,
        policy: &RateLimitPolicy,
        now: Instant,
    ) -> Result<Decision, EvaluationError> {
        let counts = self.store.counts(client, now, policy.burst_window())?;

        if counts.burst >= policy.burst_limit {
            debug!(
                client = %client,
                burst = counts.burst,
                limit = policy.burst_limit,
                "Request denied: burst window exceeded"
            );
            return Ok(Decision::deny(*policy, DenyReason::BurstExceeded));
        }

        if counts.minute >= policy.requests_per_minute {
            debug!(
                client = %client,
                minute = counts.minute,
                limit = policy.requests_per_minute,
                "Request denied: per-minute limit exceeded"
            );
            return Ok(Decision::deny(*policy, DenyReason::MinuteExceeded));
        }

        if counts.hour >= policy.requests_per_hour {
            debug!(
                client = %client,
                hour = counts.hour,
                limit = policy.requests_per_hour,
                "Request denied: per-hour limit exceeded"
            );
            return Ok(Decision::deny(*policy, DenyReason::HourExceeded));
        }

        self.store.record(client, now)?;
        Ok(Decision::allow(*policy, counts))
    }

    /// The window store backing this controller.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}
