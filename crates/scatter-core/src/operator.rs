//! Mutation plans emitted by the scatterer.
//!
//! An [`Operator`] is an ordered list of [`OpStep`]s that moves one region
//! from its current peer/leader assignment to a target assignment. Once
//! returned it belongs to the caller; the execution pipeline applies it.

use serde::{Deserialize, Serialize};

use crate::types::{RegionId, StoreId};

/// Description attached to every operator built by the region scatterer.
pub const SCATTER_REGION_DESC: &str = "scatter-region";

/// Scheduling priority hint for the execution pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpPriority {
    Low,
    Normal,
    High,
}

/// A single mutation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpStep {
    /// Add a new learner replica on `to_store`.
    AddLearner { to_store: StoreId },
    /// Promote the learner on `to_store` to a voter.
    PromoteLearner { to_store: StoreId },
    /// Demote the voter on `to_store` to a learner.
    DemoteVoter { to_store: StoreId },
    /// Move leadership between two voter replicas.
    TransferLeader { from_store: StoreId, to_store: StoreId },
    /// Drop the replica on `from_store`.
    RemovePeer { from_store: StoreId },
}

impl OpStep {
    /// Store the step acts on (destination for transfers).
    pub fn store(&self) -> StoreId {
        match *self {
            OpStep::AddLearner { to_store }
            | OpStep::PromoteLearner { to_store }
            | OpStep::DemoteVoter { to_store }
            | OpStep::TransferLeader { to_store, .. } => to_store,
            OpStep::RemovePeer { from_store } => from_store,
        }
    }
}

/// An ordered mutation plan for one region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub desc: String,
    pub region_id: RegionId,
    pub priority: OpPriority,
    pub steps: Vec<OpStep>,
}

impl Operator {
    pub fn new(desc: &str, region_id: RegionId, steps: Vec<OpStep>) -> Self {
        Self {
            desc: desc.to_string(),
            region_id,
            priority: OpPriority::Normal,
            steps,
        }
    }

    pub fn with_priority(mut self, priority: OpPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, index: usize) -> Option<&OpStep> {
        self.steps.get(index)
    }

    /// Stores that gain a replica.
    pub fn added_stores(&self) -> impl Iterator<Item = StoreId> + '_ {
        self.steps.iter().filter_map(|s| match s {
            OpStep::AddLearner { to_store } => Some(*to_store),
            _ => None,
        })
    }

    /// Stores that lose their replica.
    pub fn removed_stores(&self) -> impl Iterator<Item = StoreId> + '_ {
        self.steps.iter().filter_map(|s| match s {
            OpStep::RemovePeer { from_store } => Some(*from_store),
            _ => None,
        })
    }
}
