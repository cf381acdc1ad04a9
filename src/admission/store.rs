//! Window store trait abstracting request history for the admission
//! controller.

use std::time::{Duration, Instant};
use thiserror::Error;

use super::client::ClientKey;

/// Error raised by a window store during evaluation.
///
/// The admission controller converts this into an allow decision; it never
/// propagates to the request pipeline.
#[derive(Debug, Error)]
#[error("Window evaluation failed: {0}")]
pub struct EvaluationError(pub String);

/// Counts over the three sliding windows, taken from one consistent
/// per-client snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCounts {
    /// Requests inside the policy's burst window
    pub burst: u32,
    /// Requests inside the trailing 60 seconds
    pub minute: u32,
    /// Requests inside the trailing hour
    pub hour: u32,
}

/// Per-client request history consulted by the admission controller.
///
/// Implementations must serialize pruning, counting, and appending per
/// client: a count taken while another request for the same client is being
/// recorded or pruned must never observe torn state. Methods are synchronous
/// because the admission path never suspends.
pub trait WindowStore: Send + Sync {
    /// Prune the client's history to the retention bound, then count the
    /// burst, minute, and hour windows from the pruned snapshot.
    fn counts(
        &self,
        client: &ClientKey,
        now: Instant,
        burst_window: Duration,
    ) -> Result<WindowCounts, EvaluationError>;

    /// Append an admitted request to the client's history.
    fn record(&self, client: &ClientKey, now: Instant) -> Result<(), EvaluationError>;
}
