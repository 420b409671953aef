//! Traits at the boundary with the external cluster collaborators.
//!
//! The scatterer never talks to the network or disk itself. Everything it
//! knows about stores, regions and placement rules arrives through these
//! traits, and every plan it builds leaves through [`OperatorSink`].
//! Implementations are expected to answer from cached snapshots.

use scatter_core::{Operator, Peer, RegionId, RegionInfo, Rule, StoreId, StoreInfo, StoreState};

use crate::error::StateResult;

/// Read access to cluster topology.
pub trait TopologyProvider: Send + Sync {
    /// All stores currently in one of `states`.
    fn stores_in_state(&self, states: &[StoreState]) -> StateResult<Vec<StoreInfo>>;

    fn store(&self, id: StoreId) -> StateResult<Option<StoreInfo>>;

    /// Peers of a region. Unknown regions are `StateError::NotFound`.
    fn peers_of(&self, region_id: RegionId) -> StateResult<Vec<Peer>>;

    /// Store holding the region's leader, if one is elected.
    fn leader_of(&self, region_id: RegionId) -> StateResult<Option<StoreId>>;

    /// Hot regions are left alone by the scatterer.
    fn is_region_hot(&self, _region_id: RegionId) -> bool {
        false
    }

    /// Assemble a region snapshot from `peers_of` and `leader_of`.
    fn region(&self, region_id: RegionId) -> StateResult<RegionInfo> {
        let peers = self.peers_of(region_id)?;
        let leader = self.leader_of(region_id)?;
        Ok(RegionInfo::new(region_id, peers, leader))
    }
}

/// Read access to the placement-rule engine.
pub trait RuleProvider: Send + Sync {
    /// Rules governing replica count, role and label constraints for `region`.
    fn applicable_rules(&self, region: &RegionInfo) -> StateResult<Vec<Rule>>;
}

/// The operator execution pipeline.
pub trait OperatorSink: Send + Sync {
    /// Hand a built plan over for execution. A rejection leaves the cluster
    /// untouched.
    fn submit(&self, op: &Operator) -> StateResult<()>;
}
