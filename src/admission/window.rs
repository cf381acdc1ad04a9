//! Sliding-window request histories, one per client.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use super::client::ClientKey;
use super::store::{EvaluationError, WindowCounts, WindowStore};

/// Retention bound for request histories: the longest window any check
/// needs. Shorter windows are derived as subset counts of the same history,
/// so no window's count is corrupted by another window's pruning.
const RETENTION: Duration = Duration::from_secs(3600);

/// The per-minute window.
const MINUTE: Duration = Duration::from_secs(60);

/// Request history for a single client.
///
/// Timestamps are kept in ascending order and pruned only to the retention
/// bound. The hour count is the pruned history length; burst and minute
/// counts are non-destructive subset counts over the tail.
#[derive(Debug, Default)]
pub struct WindowState {
    timestamps: VecDeque<Instant>,
}

impl WindowState {
    /// Drop timestamps that have aged out of the retention bound.
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.duration_since(oldest) >= RETENTION {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Count timestamps inside the trailing `window`, without mutating the
    /// history.
    fn count_since(&self, now: Instant, window: Duration) -> u32 {
        // Ascending order lets the scan stop at the first timestamp outside
        // the window.
        self.timestamps
            .iter()
            .rev()
            .take_while(|&&t| now.duration_since(t) < window)
            .count() as u32
    }

    /// Append a request timestamp, restoring ascending order if concurrent
    /// callers interleaved their clock reads.
    fn record(&mut self, now: Instant) {
        let mut index = self.timestamps.len();
        while index > 0 && self.timestamps[index - 1] > now {
            index -= 1;
        }
        self.timestamps.insert(index, now);
    }

    fn len(&self) -> u32 {
        self.timestamps.len() as u32
    }

    fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Tracks request histories for all clients.
///
/// The map is sharded by client key, so concurrent requests for different
/// clients proceed independently while prune/count/append for one client are
/// serialized by the shard entry lock.
pub struct WindowTracker {
    windows: DashMap<ClientKey, WindowState>,
}

impl WindowTracker {
    /// Create an empty tracker. Client entries are created lazily on first
    /// request.
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }

    /// Number of clients currently tracked.
    pub fn client_count(&self) -> usize {
        self.windows.len()
    }

    /// Drop clients whose entire history has aged out of retention.
    ///
    /// Correctness never depends on this sweep; it bounds memory held for
    /// idle clients. Returns the number of clients removed.
    pub fn sweep_idle(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, state| {
            state.prune(now);
            !state.is_empty()
        });
        let removed = before - self.windows.len();
        if removed > 0 {
            debug!(removed = removed, "Swept idle client windows");
        }
        removed
    }
}

impl WindowStore for WindowTracker {
    fn counts(
        &self,
        client: &ClientKey,
        now: Instant,
        burst_window: Duration,
    ) -> Result<WindowCounts, EvaluationError> {
        let mut entry = self.windows.entry(client.clone()).or_default();
        let state = entry.value_mut();

        state.prune(now);
        Ok(WindowCounts {
            burst: state.count_since(now, burst_window),
            minute: state.count_since(now, MINUTE),
            // History is pruned to exactly the hour, so the hour count is
            // the remaining length.
            hour: state.len(),
        })
    }

    fn record(&self, client: &ClientKey, now: Instant) -> Result<(), EvaluationError> {
        self.windows
            .entry(client.clone())
            .or_default()
            .value_mut()
            .record(now);
        Ok(())
    }
}

impl Default for WindowTracker {
    fn default() -> Self {
        Self::new()
    }
}
