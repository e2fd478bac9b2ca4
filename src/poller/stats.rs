//! Counters describing what the poll loop has done so far.

use serde::Serialize;

/// Poll statistics, updated once per cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollStats {
    /// Number of completed cycles (successful or not)
    pub cycles: u64,
    /// Cycles that delivered a non-empty batch
    pub batches: u64,
    /// Events delivered to the handler
    pub events: u64,
    /// Cycles that returned no events
    pub empty_polls: u64,
    /// Cycles that failed in fetch or dispatch
    pub failures: u64,
    /// Failures since the last successful cycle
    pub consecutive_failures: u32,
    /// Event discarded by the backlog skip, if any
    pub skipped_event: Option<i64>,
}

impl PollStats {
    /// Create empty stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a cycle that delivered `count` events
    pub fn delivered(&mut self, count: usize) {
        self.cycles += 1;
        self.batches += 1;
        self.events += count as u64;
        self.consecutive_failures = 0;
    }

    /// Record a cycle that returned nothing
    pub fn empty(&mut self) {
        self.cycles += 1;
        self.empty_polls += 1;
        self.consecutive_failures = 0;
    }

    /// Record a failed cycle
    pub fn failed(&mut self) {
        self.cycles += 1;
        self.failures += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }
}
