//! Per-key sliding window state and the bucketed counting algorithm.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::policy::Policy;

/// Bucketed event counts for a single key.
///
/// Counts are aggregated into buckets keyed by their start timestamp (epoch
/// seconds) instead of storing one timestamp per event. Buckets whose start
/// is at or before `now - window` are stale and are dropped on the next
/// increment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    /// Until this timestamp every request is rejected without looking at the
    /// buckets. Zero when not suppressed.
    pub suppressed_until: u64,
    /// Bucket start timestamp -> event count
    pub buckets: HashMap<u64, u64>,
}

/// Result of running [`Window::increment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    /// Whether the event was admitted.
    pub admitted: bool,
    /// Whether the window changed and must be written back.
    pub mutated: bool,
}

impl Window {
    /// Create an empty window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to record one event at `now` (epoch seconds) under `policy`.
    ///
    /// While suppressed, this returns immediately with `mutated == false`.
    /// Otherwise stale buckets are purged, and either the current bucket is
    /// incremented or the window is suppressed until its oldest surviving
    /// bucket leaves the window. Both of those paths report `mutated == true`.
    pub fn increment(&mut self, now: u64, policy: &Policy) -> Outcome {
        if now < self.suppressed_until {
            return Outcome {
                admitted: false,
                mutated: false,
            };
        }

        let boundary = now.saturating_sub(policy.window_secs());
        let mut current_sum: u64 = 0;
        let mut oldest_bucket = u64::MAX;

        self.buckets.retain(|&start, &mut count| {
            if start <= boundary {
                return false;
            }
            oldest_bucket = oldest_bucket.min(start);
            current_sum += count;
            true
        });

        if current_sum < policy.limit() {
            self.suppressed_until = 0;
            let bucket = now - now % policy.bucket_secs();
            *self.buckets.entry(bucket).or_insert(0) += 1;
            return Outcome {
                admitted: true,
                mutated: true,
            };
        }

        // The sum can only drop once the oldest bucket ages out
        self.suppressed_until = oldest_bucket.saturating_add(policy.window_secs());
        Outcome {
            admitted: false,
            mutated: true,
        }
    }

    /// Approximate number of events in the window ending at `now`.
    ///
    /// Read-only: stale buckets are skipped but not removed.
    pub fn count(&self, now: u64, window_secs: u64) -> u64 {
        let boundary = now.saturating_sub(window_secs);
        self.buckets
            .iter()
            .filter(|(&start, _)| start > boundary)
            .map(|(_, &count)| count)
            .sum()
    }

    /// Whether the window is in its suppression period at `now`.
    pub fn is_suppressed(&self, now: u64) -> bool {
        now < self.suppressed_until
    }
}
