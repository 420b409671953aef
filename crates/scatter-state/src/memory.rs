//! MemoryCluster: in-memory topology, rule manager and execution pipeline.
//!
//! Backs the scatterer in tests and in embedders that keep their own cluster
//! view. Stores, regions and rules live behind `RwLock`s; every accessor
//! returns a cloned snapshot. Applying an operator is all-or-nothing: the
//! steps run against a copy of the region which only replaces the stored one
//! when every step succeeded.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;

use scatter_core::{
    OpStep, Operator, Peer, PeerRole, RegionId, RegionInfo, Rule, StoreId, StoreInfo, StoreState,
};

use crate::error::{StateError, StateResult};
use crate::provider::{OperatorSink, RuleProvider, TopologyProvider};

/// Convert a poisoned lock into a `StateError::Lock`.
macro_rules! map_err {
    ($what:literal) => {
        |_| StateError::Lock($what.to_string())
    };
}

const DEFAULT_MAX_REPLICAS: usize = 3;

struct RuleSet {
    /// When disabled every region gets `max_replicas` voters anywhere.
    placement_rules_enabled: bool,
    max_replicas: usize,
    /// Cluster-wide rules keyed by (group_id, id).
    rules: BTreeMap<(String, String), Rule>,
    /// Per-region overrides, replacing the cluster-wide list.
    region_rules: HashMap<RegionId, Vec<Rule>>,
}

struct Inner {
    stores: RwLock<BTreeMap<StoreId, StoreInfo>>,
    regions: RwLock<BTreeMap<RegionId, RegionInfo>>,
    rules: RwLock<RuleSet>,
    hot: RwLock<HashSet<RegionId>>,
    next_peer_id: AtomicU64,
}

/// Thread-safe in-memory cluster.
#[derive(Clone)]
pub struct MemoryCluster {
    inner: Arc<Inner>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    /// Empty cluster with placement rules disabled and 3 replicas.
    pub fn new() -> Self {
        let default_rule = Rule::default_voters(DEFAULT_MAX_REPLICAS);
        let mut rules = BTreeMap::new();
        rules.insert(
            (default_rule.group_id.clone(), default_rule.id.clone()),
            default_rule,
        );
        Self {
            inner: Arc::new(Inner {
                stores: RwLock::new(BTreeMap::new()),
                regions: RwLock::new(BTreeMap::new()),
                rules: RwLock::new(RuleSet {
                    placement_rules_enabled: false,
                    max_replicas: DEFAULT_MAX_REPLICAS,
                    rules,
                    region_rules: HashMap::new(),
                }),
                hot: RwLock::new(HashSet::new()),
                next_peer_id: AtomicU64::new(1),
            }),
        }
    }

    // ── Stores ─────────────────────────────────────────────────────

    pub fn put_store(&self, store: StoreInfo) -> StateResult<()> {
        let mut stores = self.inner.stores.write().map_err(map_err!("stores"))?;
        debug!(store_id = %store.id, "store stored");
        stores.insert(store.id, store);
        Ok(())
    }

    /// Add an ordinary `Up` store.
    pub fn add_region_store(&self, id: u64) -> StateResult<()> {
        self.put_store(StoreInfo::new(StoreId(id)))
    }

    /// Add an `Up` store carrying `labels`.
    pub fn add_labels_store(&self, id: u64, labels: &[(&str, &str)]) -> StateResult<()> {
        let store = labels
            .iter()
            .fold(StoreInfo::new(StoreId(id)), |s, (k, v)| s.with_label(k, v));
        self.put_store(store)
    }

    pub fn set_store_state(&self, id: StoreId, state: StoreState) -> StateResult<()> {
        let mut stores = self.inner.stores.write().map_err(map_err!("stores"))?;
        let store = stores
            .get_mut(&id)
            .ok_or_else(|| StateError::NotFound(format!("store {id}")))?;
        store.state = state;
        Ok(())
    }

    // ── Regions ────────────────────────────────────────────────────

    pub fn put_region(&self, region: RegionInfo) -> StateResult<()> {
        let mut regions = self.inner.regions.write().map_err(map_err!("regions"))?;
        regions.insert(region.id, region);
        Ok(())
    }

    pub fn get_region(&self, id: RegionId) -> StateResult<Option<RegionInfo>> {
        let regions = self.inner.regions.read().map_err(map_err!("regions"))?;
        Ok(regions.get(&id).cloned())
    }

    /// Add a region with voters on `leader` and `followers`; `leader` leads.
    pub fn add_leader_region(
        &self,
        id: u64,
        leader: u64,
        followers: &[u64],
    ) -> StateResult<RegionInfo> {
        self.add_region_with_learner(id, leader, followers, &[])
    }

    /// Like [`add_leader_region`](Self::add_leader_region), plus learners.
    pub fn add_region_with_learner(
        &self,
        id: u64,
        leader: u64,
        followers: &[u64],
        learners: &[u64],
    ) -> StateResult<RegionInfo> {
        let voters = std::iter::once(leader)
            .chain(followers.iter().copied())
            .map(|s| (s, PeerRole::Voter));
        let learners = learners.iter().map(|s| (*s, PeerRole::Learner));
        let peers = voters
            .chain(learners)
            .map(|(store, role)| Peer {
                id: self.alloc_peer_id(),
                store_id: StoreId(store),
                role,
            })
            .collect();
        let region = RegionInfo::new(RegionId(id), peers, Some(StoreId(leader)));
        self.put_region(region.clone())?;
        Ok(region)
    }

    pub fn region_count(&self) -> StateResult<usize> {
        let regions = self.inner.regions.read().map_err(map_err!("regions"))?;
        Ok(regions.len())
    }

    pub fn set_region_hot(&self, id: RegionId, hot: bool) -> StateResult<()> {
        let mut set = self.inner.hot.write().map_err(map_err!("hot regions"))?;
        if hot {
            set.insert(id);
        } else {
            set.remove(&id);
        }
        Ok(())
    }

    fn alloc_peer_id(&self) -> u64 {
        self.inner.next_peer_id.fetch_add(1, Ordering::Relaxed)
    }

    // ── Rules ──────────────────────────────────────────────────────

    pub fn enable_placement_rules(&self, enabled: bool) -> StateResult<()> {
        let mut rules = self.inner.rules.write().map_err(map_err!("rules"))?;
        rules.placement_rules_enabled = enabled;
        Ok(())
    }

    pub fn set_max_replicas(&self, count: usize) -> StateResult<()> {
        let mut rules = self.inner.rules.write().map_err(map_err!("rules"))?;
        rules.max_replicas = count;
        Ok(())
    }

    /// Insert or replace a cluster-wide rule.
    pub fn set_rule(&self, rule: Rule) -> StateResult<()> {
        if rule.count == 0 {
            return Err(StateError::Invalid(format!(
                "rule {}/{} has zero count",
                rule.group_id, rule.id
            )));
        }
        let mut rules = self.inner.rules.write().map_err(map_err!("rules"))?;
        rules
            .rules
            .insert((rule.group_id.clone(), rule.id.clone()), rule);
        Ok(())
    }

    /// Override the rules of a single region.
    pub fn set_region_rules(&self, region_id: RegionId, rules: Vec<Rule>) -> StateResult<()> {
        let mut set = self.inner.rules.write().map_err(map_err!("rules"))?;
        set.region_rules.insert(region_id, rules);
        Ok(())
    }

    // ── Operators ──────────────────────────────────────────────────

    /// Apply every step of `op` to its region, or nothing at all.
    pub fn apply_operator(&self, op: &Operator) -> StateResult<()> {
        let mut regions = self.inner.regions.write().map_err(map_err!("regions"))?;
        let current = regions
            .get(&op.region_id)
            .ok_or_else(|| StateError::NotFound(format!("region {}", op.region_id)))?;

        let mut region = current.clone();
        for step in &op.steps {
            self.apply_step(&mut region, step)?;
        }
        debug!(region_id = %op.region_id, steps = op.len(), "operator applied");
        regions.insert(op.region_id, region);
        Ok(())
    }

    fn apply_step(&self, region: &mut RegionInfo, step: &OpStep) -> StateResult<()> {
        let region_id = region.id;
        let invalid = |msg: String| StateError::Invalid(format!("region {region_id}: {msg}"));
        match *step {
            OpStep::AddLearner { to_store } => {
                if region.peer_on(to_store).is_some() {
                    return Err(invalid(format!("store {to_store} already has a peer")));
                }
                let peer = Peer {
                    id: self.alloc_peer_id(),
                    store_id: to_store,
                    role: PeerRole::Learner,
                };
                region.peers.push(peer);
            }
            OpStep::PromoteLearner { to_store } => {
                let peer = region
                    .peers
                    .iter_mut()
                    .find(|p| p.store_id == to_store && p.role == PeerRole::Learner)
                    .ok_or_else(|| invalid(format!("no learner on store {to_store}")))?;
                peer.role = PeerRole::Voter;
            }
            OpStep::DemoteVoter { to_store } => {
                if region.leader == Some(to_store) {
                    return Err(invalid(format!("cannot demote leader on store {to_store}")));
                }
                let peer = region
                    .peers
                    .iter_mut()
                    .find(|p| p.store_id == to_store && p.role == PeerRole::Voter)
                    .ok_or_else(|| invalid(format!("no voter on store {to_store}")))?;
                peer.role = PeerRole::Learner;
            }
            OpStep::TransferLeader { from_store, to_store } => {
                if region.leader != Some(from_store) {
                    return Err(invalid(format!("leader is not on store {from_store}")));
                }
                let target_is_voter = region
                    .peer_on(to_store)
                    .is_some_and(|p| p.role == PeerRole::Voter);
                if !target_is_voter {
                    return Err(invalid(format!("no voter on store {to_store}")));
                }
                region.leader = Some(to_store);
            }
            OpStep::RemovePeer { from_store } => {
                if region.leader == Some(from_store) {
                    return Err(invalid(format!("cannot remove leader on store {from_store}")));
                }
                let before = region.peers.len();
                region.peers.retain(|p| p.store_id != from_store);
                if region.peers.len() == before {
                    return Err(invalid(format!("no peer on store {from_store}")));
                }
            }
        }
        Ok(())
    }
}

impl TopologyProvider for MemoryCluster {
    fn stores_in_state(&self, states: &[StoreState]) -> StateResult<Vec<StoreInfo>> {
        let stores = self.inner.stores.read().map_err(map_err!("stores"))?;
        Ok(stores
            .values()
            .filter(|s| states.contains(&s.state))
            .cloned()
            .collect())
    }

    fn store(&self, id: StoreId) -> StateResult<Option<StoreInfo>> {
        let stores = self.inner.stores.read().map_err(map_err!("stores"))?;
        Ok(stores.get(&id).cloned())
    }

    fn peers_of(&self, region_id: RegionId) -> StateResult<Vec<Peer>> {
        let regions = self.inner.regions.read().map_err(map_err!("regions"))?;
        regions
            .get(&region_id)
            .map(|r| r.peers.clone())
            .ok_or_else(|| StateError::NotFound(format!("region {region_id}")))
    }

    fn leader_of(&self, region_id: RegionId) -> StateResult<Option<StoreId>> {
        let regions = self.inner.regions.read().map_err(map_err!("regions"))?;
        regions
            .get(&region_id)
            .map(|r| r.leader)
            .ok_or_else(|| StateError::NotFound(format!("region {region_id}")))
    }

    fn is_region_hot(&self, region_id: RegionId) -> bool {
        self.inner
            .hot
            .read()
            .map(|set| set.contains(&region_id))
            .unwrap_or(false)
    }
}

impl RuleProvider for MemoryCluster {
    fn applicable_rules(&self, region: &RegionInfo) -> StateResult<Vec<Rule>> {
        let set = self.inner.rules.read().map_err(map_err!("rules"))?;
        if let Some(rules) = set.region_rules.get(&region.id) {
            return Ok(rules.clone());
        }
        if !set.placement_rules_enabled {
            return Ok(vec![Rule::default_voters(set.max_replicas)]);
        }
        Ok(set.rules.values().cloned().collect())
    }
}

impl OperatorSink for MemoryCluster {
    fn submit(&self, op: &Operator) -> StateResult<()> {
        self.apply_operator(op)
            .map_err(|e| StateError::Rejected(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scatter_core::{LabelConstraint, LabelOp};

    fn three_store_cluster() -> MemoryCluster {
        let cluster = MemoryCluster::new();
        for id in 1..=4 {
            cluster.add_region_store(id).unwrap();
        }
        cluster
    }

    #[test]
    fn stores_in_state_filters() {
        let cluster = three_store_cluster();
        cluster.set_store_state(StoreId(2), StoreState::Offline).unwrap();

        let up = cluster.stores_in_state(&[StoreState::Up]).unwrap();
        assert_eq!(up.len(), 3);
        assert!(up.iter().all(|s| s.id != StoreId(2)));

        let offline = cluster.stores_in_state(&[StoreState::Offline]).unwrap();
        assert_eq!(offline.len(), 1);
    }

    #[test]
    fn set_state_of_unknown_store_fails() {
        let cluster = MemoryCluster::new();
        let err = cluster.set_store_state(StoreId(9), StoreState::Down).unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[test]
    fn region_snapshot_from_peers_and_leader() {
        let cluster = three_store_cluster();
        let added = cluster.add_leader_region(1, 1, &[2, 3]).unwrap();

        let region = cluster.region(RegionId(1)).unwrap();
        assert_eq!(region, added);
        assert_eq!(region.leader, Some(StoreId(1)));
        assert_eq!(region.peers.len(), 3);

        assert!(matches!(
            cluster.peers_of(RegionId(2)),
            Err(StateError::NotFound(_))
        ));
    }

    #[test]
    fn default_rule_when_placement_rules_disabled() {
        let cluster = three_store_cluster();
        let region = cluster.add_leader_region(1, 1, &[2, 3]).unwrap();
        cluster
            .set_rule(Rule {
                group_id: "pd".to_string(),
                id: "learner".to_string(),
                role: PeerRole::Learner,
                count: 1,
                label_constraints: vec![],
            })
            .unwrap();

        let rules = cluster.applicable_rules(&region).unwrap();
        assert_eq!(rules, vec![Rule::default_voters(3)]);

        cluster.enable_placement_rules(true).unwrap();
        let rules = cluster.applicable_rules(&region).unwrap();
        assert_eq!(rules.len(), 2);
    }

    #[test]
    fn region_rules_override_cluster_rules() {
        let cluster = three_store_cluster();
        let region = cluster.add_leader_region(1, 1, &[2, 3]).unwrap();
        let pinned = Rule {
            label_constraints: vec![LabelConstraint::new("zone", LabelOp::In, &["nowhere"])],
            ..Rule::default_voters(3)
        };
        cluster.set_region_rules(RegionId(1), vec![pinned.clone()]).unwrap();

        assert_eq!(cluster.applicable_rules(&region).unwrap(), vec![pinned]);
    }

    #[test]
    fn zero_count_rule_is_rejected() {
        let cluster = MemoryCluster::new();
        let err = cluster.set_rule(Rule::default_voters(0)).unwrap_err();
        assert!(matches!(err, StateError::Invalid(_)));
    }

    #[test]
    fn apply_move_operator() {
        let cluster = three_store_cluster();
        cluster.add_leader_region(1, 1, &[2, 3]).unwrap();

        let op = Operator::new(
            "scatter-region",
            RegionId(1),
            vec![
                OpStep::AddLearner { to_store: StoreId(4) },
                OpStep::PromoteLearner { to_store: StoreId(4) },
                OpStep::TransferLeader { from_store: StoreId(1), to_store: StoreId(4) },
                OpStep::RemovePeer { from_store: StoreId(1) },
            ],
        );
        cluster.apply_operator(&op).unwrap();

        let region = cluster.get_region(RegionId(1)).unwrap().unwrap();
        let mut stores: Vec<u64> = region.store_ids().map(|s| s.0).collect();
        stores.sort();
        assert_eq!(stores, vec![2, 3, 4]);
        assert_eq!(region.leader, Some(StoreId(4)));
        assert!(region.peers.iter().all(|p| p.role == PeerRole::Voter));
    }

    #[test]
    fn failed_operator_leaves_region_untouched() {
        let cluster = three_store_cluster();
        let before = cluster.add_leader_region(1, 1, &[2, 3]).unwrap();

        // Removing the leader without a transfer must fail mid-way.
        let op = Operator::new(
            "scatter-region",
            RegionId(1),
            vec![
                OpStep::AddLearner { to_store: StoreId(4) },
                OpStep::RemovePeer { from_store: StoreId(1) },
            ],
        );
        assert!(cluster.apply_operator(&op).is_err());
        assert_eq!(cluster.get_region(RegionId(1)).unwrap(), Some(before));
    }

    #[test]
    fn duplicate_add_is_invalid() {
        let cluster = three_store_cluster();
        cluster.add_leader_region(1, 1, &[2, 3]).unwrap();

        let op = Operator::new(
            "scatter-region",
            RegionId(1),
            vec![OpStep::AddLearner { to_store: StoreId(2) }],
        );
        assert!(matches!(cluster.apply_operator(&op), Err(StateError::Invalid(_))));
    }

    #[test]
    fn submit_maps_failures_to_rejected() {
        let cluster = three_store_cluster();
        cluster.add_leader_region(1, 1, &[2, 3]).unwrap();

        let op = Operator::new(
            "scatter-region",
            RegionId(1),
            vec![OpStep::PromoteLearner { to_store: StoreId(4) }],
        );
        assert!(matches!(cluster.submit(&op), Err(StateError::Rejected(_))));
    }

    #[test]
    fn hot_regions() {
        let cluster = three_store_cluster();
        cluster.set_region_hot(RegionId(5), true).unwrap();
        assert!(cluster.is_region_hot(RegionId(5)));
        cluster.set_region_hot(RegionId(5), false).unwrap();
        assert!(!cluster.is_region_hot(RegionId(5)));
    }
}
