//! Scatter error types.

use thiserror::Error;

use scatter_core::{Engine, PeerRole, RegionId, StoreId};
use scatter_placement::SelectError;
use scatter_state::StateError;

/// Per-region failures. None of them poison the scatterer; a batch records
/// them against the region and carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScatterError {
    #[error("no eligible target store for {role} in pool {pool}")]
    NoEligibleTarget { pool: Engine, role: PeerRole },

    #[error("conflicting placement in pool {pool} could not be resolved")]
    ConflictUnresolved { pool: Engine },

    #[error("plan rejected: {0}")]
    PlanRejected(String),

    #[error("collaborator error: {0}")]
    Collaborator(#[from] StateError),

    #[error("region {0} has no voter leader")]
    NoLeader(RegionId),

    #[error("region {region} is not fully replicated: expected {expected} peers, found {actual}")]
    NotReplicated {
        region: RegionId,
        expected: usize,
        actual: usize,
    },

    #[error("region {0} is hot")]
    RegionHot(RegionId),

    #[error("store not found: {0}")]
    StoreNotFound(StoreId),

    #[error("region not found: {0}")]
    RegionNotFound(RegionId),

    #[error("no regions to scatter")]
    EmptyRegions,

    #[error("scatter cancelled before the region was started")]
    Cancelled,

    #[error("scatter worker failed: {0}")]
    Worker(String),
}

impl ScatterError {
    /// Attach pool context to a selector failure.
    pub fn from_select(err: SelectError, pool: &Engine, role: PeerRole) -> Self {
        match err {
            SelectError::NoEligibleTarget => ScatterError::NoEligibleTarget {
                pool: pool.clone(),
                role,
            },
            SelectError::ConflictUnresolved => ScatterError::ConflictUnresolved {
                pool: pool.clone(),
            },
        }
    }

    /// Failures that may clear up on their own, so a retry can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScatterError::PlanRejected(_)
                | ScatterError::Collaborator(StateError::Lock(_) | StateError::Rejected(_))
                | ScatterError::NoLeader(_)
                | ScatterError::NotReplicated { .. }
                | ScatterError::RegionHot(_)
                | ScatterError::ConflictUnresolved { .. }
        )
    }
}

pub type ScatterResult<T> = Result<T, ScatterError>;
