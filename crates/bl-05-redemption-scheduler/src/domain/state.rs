//! Scheduler state machine and per-cycle accounting.

use std::fmt;

/// Where the scheduler is within a cycle.
///
/// ```text
/// Idle ──tick──► Scanning ──flagged allocations──► RedeemingChain
///   ▲                │ none                             │ all tasks joined
///   └────────────────┴──────────────────────────────────┘
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Scanning,
    RedeemingChain,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Scanning => "scanning",
            SchedulerState::RedeemingChain => "redeeming",
        };
        f.write_str(s)
    }
}

/// What happened to one marker this cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MarkerOutcome {
    /// Confirmed on chain and committed locally.
    Committed,
    /// Terminal failure recorded.
    Failed { reason: String },
    /// No verdict yet; the same marker is retried next cycle.
    Deferred { reason: String },
}

/// Counters for one allocation or a whole cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub allocations: usize,
    pub committed: usize,
    pub failed: usize,
    pub deferred: usize,
    /// Markers passed over because the chain has not reached them.
    pub skipped: usize,
    /// Ledger or task errors.
    pub errors: usize,
    /// Allocations whose redeem flag was cleared.
    pub settled: usize,
}

impl CycleReport {
    pub fn merge(&mut self, other: CycleReport) {
        self.allocations += other.allocations;
        self.committed += other.committed;
        self.failed += other.failed;
        self.deferred += other.deferred;
        self.skipped += other.skipped;
        self.errors += other.errors;
        self.settled += other.settled;
    }

    pub fn record(&mut self, outcome: &MarkerOutcome) {
        match outcome {
            MarkerOutcome::Committed => self.committed += 1,
            MarkerOutcome::Failed { .. } => self.failed += 1,
            MarkerOutcome::Deferred { .. } => self.deferred += 1,
        }
    }
}
