//! Scatter outcome counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Final state of one `scatter_region` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScatterOutcome {
    /// Already at its target; no operator.
    Balanced,
    /// Operator built and returned without a sink.
    PlanBuilt,
    /// Operator accepted by the sink.
    Submitted,
    Failed,
}

impl ScatterOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScatterOutcome::Balanced => "balanced",
            ScatterOutcome::PlanBuilt => "plan_built",
            ScatterOutcome::Submitted => "submitted",
            ScatterOutcome::Failed => "failed",
        }
    }
}

/// Lock-free counters, shared by every worker of a scatterer.
#[derive(Debug, Default)]
pub struct ScatterStats {
    balanced: AtomicU64,
    built: AtomicU64,
    submitted: AtomicU64,
    failed: AtomicU64,
    no_leader: AtomicU64,
    rejected: AtomicU64,
}

/// Point-in-time copy of [`ScatterStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScatterStatsSnapshot {
    pub balanced: u64,
    pub built: u64,
    pub submitted: u64,
    pub failed: u64,
    pub no_leader: u64,
    pub rejected: u64,
}

impl ScatterStats {
    pub fn record(&self, outcome: ScatterOutcome) {
        let counter = match outcome {
            ScatterOutcome::Balanced => &self.balanced,
            ScatterOutcome::PlanBuilt => &self.built,
            ScatterOutcome::Submitted => &self.submitted,
            ScatterOutcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_no_leader(&self) {
        self.no_leader.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ScatterStatsSnapshot {
        ScatterStatsSnapshot {
            balanced: self.balanced.load(Ordering::Relaxed),
            built: self.built.load(Ordering::Relaxed),
            submitted: self.submitted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            no_leader: self.no_leader.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}
