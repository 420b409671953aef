//! Region scatterer: computes a balanced target placement for one region
//! and turns the difference into an operator.
//!
//! For every region:
//! 1. Admission: a voter leader, not hot, fully replicated
//! 2. Peers are split into engine pools (ordinary + one per special engine)
//! 3. Each pool picks a target store per peer slot; the ordinary pool also
//!    picks the target leader
//! 4. Target vs current is diffed into add/promote/demote/transfer/remove
//!    steps, or nothing when already balanced

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scatter_core::{
    Engine, OpPriority, OpStep, Operator, PeerRole, RegionInfo, Rule, SCATTER_REGION_DESC,
    ScatterConfig, StoreId, StoreInfo, StoreState,
};
use scatter_placement::{EnginePoolSelector, RandomSource, SelectionKind};
use scatter_state::{OperatorSink, RuleProvider, StateError, TopologyProvider};

use crate::engine::EnginePools;
use crate::error::{ScatterError, ScatterResult};
use crate::stats::{ScatterOutcome, ScatterStats, ScatterStatsSnapshot};

/// One replica position of a region inside a pool.
#[derive(Debug, Clone, Copy)]
struct Slot {
    source: StoreId,
    role: PeerRole,
}

/// Scatters regions across the stores of each engine pool.
pub struct RegionScatterer {
    topology: Arc<dyn TopologyProvider>,
    rules: Arc<dyn RuleProvider>,
    sink: Option<Arc<dyn OperatorSink>>,
    config: ScatterConfig,
    pools: EnginePools,
    stats: ScatterStats,
}

impl RegionScatterer {
    /// Create a scatterer whose sweep tasks stop when `cancel` (or
    /// [`shutdown`](Self::shutdown)) fires.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(
        topology: Arc<dyn TopologyProvider>,
        rules: Arc<dyn RuleProvider>,
        config: ScatterConfig,
        cancel: &CancellationToken,
    ) -> Self {
        let rng = Arc::new(RandomSource::from_optional_seed(config.rng_seed()));
        let pools = EnginePools::new(config.gc_interval(), rng, cancel.child_token());
        info!(
            gc_interval_ms = config.gc_interval().as_millis() as u64,
            engine_label = config.engine_label(),
            "region scatterer started"
        );
        Self {
            topology,
            rules,
            sink: None,
            config,
            pools,
            stats: ScatterStats::default(),
        }
    }

    /// Hand every built operator to `sink` before returning it.
    pub fn with_sink(mut self, sink: Arc<dyn OperatorSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &ScatterConfig {
        &self.config
    }

    pub fn topology(&self) -> &Arc<dyn TopologyProvider> {
        &self.topology
    }

    pub fn pools(&self) -> &EnginePools {
        &self.pools
    }

    pub fn stats(&self) -> ScatterStatsSnapshot {
        self.stats.snapshot()
    }

    /// Selection counts of `group` in the pool of `engine`, if tracked.
    pub fn group_distribution(
        &self,
        engine: &Engine,
        group: &str,
        kind: SelectionKind,
    ) -> Option<HashMap<StoreId, u64>> {
        self.pools
            .peek(engine)?
            .tracker()
            .group_distribution(group, kind)
    }

    /// Stop the sweep tasks and wait for them.
    pub async fn shutdown(&self) {
        self.pools.shutdown().await;
        info!("region scatterer stopped");
    }

    // ── Single region ──────────────────────────────────────────────

    /// Scatter one region within `group`.
    ///
    /// Returns `Ok(None)` when the region already sits on its target stores
    /// with its target leader.
    pub fn scatter_region(
        &self,
        region: &RegionInfo,
        group: &str,
    ) -> ScatterResult<Option<Operator>> {
        let result = self.try_scatter(region, group);
        let outcome = match &result {
            Ok(None) => ScatterOutcome::Balanced,
            Ok(Some(_)) if self.sink.is_some() => ScatterOutcome::Submitted,
            Ok(Some(_)) => ScatterOutcome::PlanBuilt,
            Err(e) => {
                match e {
                    ScatterError::NoLeader(_) => self.stats.record_no_leader(),
                    ScatterError::PlanRejected(_) => self.stats.record_rejected(),
                    _ => {}
                }
                warn!(region_id = %region.id, group, error = %e, "region scatter failed");
                ScatterOutcome::Failed
            }
        };
        self.stats.record(outcome);
        match &result {
            Ok(Some(op)) => info!(
                region_id = %region.id,
                group,
                steps = op.len(),
                outcome = outcome.as_str(),
                "scatter operator created"
            ),
            Ok(None) => debug!(region_id = %region.id, group, "region already balanced"),
            Err(_) => {}
        }
        result
    }

    fn try_scatter(&self, region: &RegionInfo, group: &str) -> ScatterResult<Option<Operator>> {
        let current_leader = region
            .leader_peer()
            .map(|p| p.store_id)
            .ok_or(ScatterError::NoLeader(region.id))?;
        if self.topology.is_region_hot(region.id) {
            return Err(ScatterError::RegionHot(region.id));
        }

        let rules = self.rules.applicable_rules(region)?;
        let expected: usize = rules.iter().map(|r| r.count).sum();
        if !rules.is_empty() && region.peers.len() != expected {
            return Err(ScatterError::NotReplicated {
                region: region.id,
                expected,
                actual: region.peers.len(),
            });
        }

        let up_stores = self.topology.stores_in_state(&[StoreState::Up])?;
        let label = self.config.engine_label();

        // Split the region's peers into pools by the engine of their store.
        let mut slots: BTreeMap<Engine, Vec<Slot>> = BTreeMap::new();
        for peer in &region.peers {
            let engine = match up_stores.iter().find(|s| s.id == peer.store_id) {
                Some(store) => store.engine(label),
                None => self
                    .topology
                    .store(peer.store_id)?
                    .ok_or(ScatterError::StoreNotFound(peer.store_id))?
                    .engine(label),
            };
            slots.entry(engine).or_default().push(Slot {
                source: peer.store_id,
                role: peer.role,
            });
        }

        let mut target: Vec<(StoreId, PeerRole)> = Vec::with_capacity(region.peers.len());
        let mut ordinary_voters = Vec::new();
        for (engine, pool_slots) in &slots {
            let selector = self.pools.get(engine);
            let picked = self.select_pool(&selector, pool_slots, &up_stores, &rules, group)?;
            if engine.is_ordinary() {
                ordinary_voters.extend(
                    picked
                        .iter()
                        .filter(|(_, role)| *role == PeerRole::Voter)
                        .map(|(store, _)| *store),
                );
            }
            target.extend(picked);
        }

        let target_leader =
            self.select_leader(&ordinary_voters, &target, current_leader, region, group)?;

        let steps = build_steps(region, current_leader, &target, target_leader);
        if steps.is_empty() {
            return Ok(None);
        }

        let op = Operator::new(SCATTER_REGION_DESC, region.id, steps)
            .with_priority(OpPriority::High);
        self.recheck_added_stores(&op)?;

        if let Some(sink) = &self.sink {
            sink.submit(&op).map_err(|e| match e {
                StateError::Rejected(msg) => ScatterError::PlanRejected(msg),
                other => ScatterError::Collaborator(other),
            })?;
        }
        Ok(Some(op))
    }

    /// Pick a target store for every slot of one pool.
    ///
    /// Slots are served from a queue. When a slot picks a store that another
    /// queued slot still holds, that slot keeps its store in place and the
    /// busiest remaining holder is sent to re-select first.
    fn select_pool(
        &self,
        selector: &EnginePoolSelector,
        slots: &[Slot],
        up_stores: &[StoreInfo],
        rules: &[Rule],
        group: &str,
    ) -> ScatterResult<Vec<(StoreId, PeerRole)>> {
        let engine = selector.engine();
        let label = self.config.engine_label();
        let eligible = |role: PeerRole| -> Vec<StoreId> {
            let governing: Vec<&Rule> = rules
                .iter()
                .filter(|r| r.role == role && &r.engine(label) == engine)
                .collect();
            up_stores
                .iter()
                .filter(|s| &s.engine(label) == engine)
                .filter(|s| governing.is_empty() || governing.iter().any(|r| r.matches(s)))
                .map(|s| s.id)
                .collect()
        };

        let mut targets: Vec<Option<StoreId>> = vec![None; slots.len()];
        let mut claimed: HashSet<StoreId> = HashSet::new();
        let mut queue: VecDeque<usize> = (0..slots.len()).collect();
        let mut conflicted = false;

        while let Some(i) = queue.pop_front() {
            let slot = slots[i];
            let candidates: Vec<StoreId> = eligible(slot.role)
                .into_iter()
                .filter(|s| !claimed.contains(s))
                .collect();
            let picked = selector
                .select_store(&candidates, Some(slot.source), group)
                .map_err(|e| {
                    if conflicted {
                        ScatterError::ConflictUnresolved { pool: engine.clone() }
                    } else {
                        ScatterError::from_select(e, engine, slot.role)
                    }
                })?;
            claimed.insert(picked);

            let holder = queue.iter().position(|&j| slots[j].source == picked);
            let Some(pos) = holder else {
                targets[i] = Some(picked);
                continue;
            };

            // The queued holder of `picked` keeps it in place.
            conflicted = true;
            if let Some(j) = queue.remove(pos) {
                targets[j] = Some(picked);
            }

            let mut holders: Vec<StoreId> = vec![slot.source];
            holders.extend(queue.iter().map(|&j| slots[j].source));
            let evicted = selector
                .replace_for_conflict(&holders, picked, group)
                .map_err(|e| ScatterError::from_select(e, engine, slot.role))?;

            let evicted_slot = queue.iter().position(|&j| slots[j].source == evicted);
            match evicted_slot {
                Some(pos) => {
                    if let Some(k) = queue.remove(pos) {
                        queue.push_front(k);
                    }
                    queue.push_back(i);
                }
                None => queue.push_front(i),
            }
            debug!(
                engine = %engine,
                group,
                store_id = %picked,
                evicted = %evicted,
                "same-store conflict resolved"
            );
        }

        Ok(slots
            .iter()
            .zip(targets)
            .filter_map(|(slot, t)| t.map(|store| (store, slot.role)))
            .collect())
    }

    fn select_leader(
        &self,
        ordinary_voters: &[StoreId],
        target: &[(StoreId, PeerRole)],
        current_leader: StoreId,
        region: &RegionInfo,
        group: &str,
    ) -> ScatterResult<StoreId> {
        let fallback: Vec<StoreId>;
        let candidates = if ordinary_voters.is_empty() {
            fallback = target
                .iter()
                .filter(|(_, role)| *role == PeerRole::Voter)
                .map(|(store, _)| *store)
                .collect();
            &fallback
        } else {
            ordinary_voters
        };
        if candidates.is_empty() {
            return Err(ScatterError::NoLeader(region.id));
        }
        self.pools
            .ordinary()
            .select_leader(candidates, Some(current_leader), group)
            .map_err(|e| ScatterError::from_select(e, &Engine::Ordinary, PeerRole::Voter))
    }

    /// Every store gaining a replica must still be up right before hand-off.
    fn recheck_added_stores(&self, op: &Operator) -> ScatterResult<()> {
        for store_id in op.added_stores() {
            let store = self.topology.store(store_id)?;
            if !store.is_some_and(|s| s.is_available()) {
                return Err(ScatterError::PlanRejected(format!(
                    "target store {store_id} is no longer up"
                )));
            }
        }
        Ok(())
    }
}

/// Diff `region` against its target placement.
///
/// Steps come out as: add learners, promote, demote, transfer leader, remove.
/// A demotion of the current leader is preceded by the transfer.
fn build_steps(
    region: &RegionInfo,
    current_leader: StoreId,
    target: &[(StoreId, PeerRole)],
    target_leader: StoreId,
) -> Vec<OpStep> {
    let current: HashMap<StoreId, PeerRole> =
        region.peers.iter().map(|p| (p.store_id, p.role)).collect();
    let wanted: HashMap<StoreId, PeerRole> = target.iter().copied().collect();

    let mut adds = Vec::new();
    let mut promotes = Vec::new();
    let mut demotes = Vec::new();
    for &(store, role) in target {
        match current.get(&store) {
            None => {
                adds.push(OpStep::AddLearner { to_store: store });
                if role == PeerRole::Voter {
                    promotes.push(OpStep::PromoteLearner { to_store: store });
                }
            }
            Some(PeerRole::Learner) if role == PeerRole::Voter => {
                promotes.push(OpStep::PromoteLearner { to_store: store });
            }
            Some(PeerRole::Voter) if role == PeerRole::Learner => {
                demotes.push(OpStep::DemoteVoter { to_store: store });
            }
            Some(_) => {}
        }
    }
    let removes: Vec<OpStep> = region
        .peers
        .iter()
        .filter(|p| !wanted.contains_key(&p.store_id))
        .map(|p| OpStep::RemovePeer { from_store: p.store_id })
        .collect();

    let transfer = (target_leader != current_leader).then_some(OpStep::TransferLeader {
        from_store: current_leader,
        to_store: target_leader,
    });
    let leader_demoted = demotes
        .iter()
        .any(|s| matches!(s, OpStep::DemoteVoter { to_store } if *to_store == current_leader));

    let mut steps = adds;
    steps.extend(promotes);
    if leader_demoted {
        steps.extend(transfer);
        steps.extend(demotes);
    } else {
        steps.extend(demotes);
        steps.extend(transfer);
    }
    steps.extend(removes);
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use scatter_core::{Peer, RegionId};

    fn region(peers: &[(u64, PeerRole)], leader: u64) -> RegionInfo {
        RegionInfo::new(
            RegionId(1),
            peers
                .iter()
                .enumerate()
                .map(|(i, (store, role))| Peer {
                    id: i as u64 + 1,
                    store_id: StoreId(*store),
                    role: *role,
                })
                .collect(),
            Some(StoreId(leader)),
        )
    }

    fn voters(stores: &[u64]) -> Vec<(StoreId, PeerRole)> {
        stores.iter().map(|s| (StoreId(*s), PeerRole::Voter)).collect()
    }

    #[test]
    fn unchanged_target_builds_nothing() {
        let r = region(&[(1, PeerRole::Voter), (2, PeerRole::Voter), (3, PeerRole::Voter)], 1);
        assert!(build_steps(&r, StoreId(1), &voters(&[3, 1, 2]), StoreId(1)).is_empty());
    }

    #[test]
    fn move_adds_before_removing() {
        let r = region(&[(1, PeerRole::Voter), (2, PeerRole::Voter), (3, PeerRole::Voter)], 1);
        let steps = build_steps(&r, StoreId(1), &voters(&[4, 2, 3]), StoreId(4));
        assert_eq!(
            steps,
            vec![
                OpStep::AddLearner { to_store: StoreId(4) },
                OpStep::PromoteLearner { to_store: StoreId(4) },
                OpStep::TransferLeader { from_store: StoreId(1), to_store: StoreId(4) },
                OpStep::RemovePeer { from_store: StoreId(1) },
            ]
        );
    }

    #[test]
    fn leader_only_move() {
        let r = region(&[(1, PeerRole::Voter), (2, PeerRole::Voter), (3, PeerRole::Voter)], 1);
        let steps = build_steps(&r, StoreId(1), &voters(&[1, 2, 3]), StoreId(2));
        assert_eq!(
            steps,
            vec![OpStep::TransferLeader { from_store: StoreId(1), to_store: StoreId(2) }]
        );
    }

    #[test]
    fn learner_added_without_promotion() {
        let r = region(&[(1, PeerRole::Voter), (5, PeerRole::Learner)], 1);
        let target = vec![(StoreId(1), PeerRole::Voter), (StoreId(6), PeerRole::Learner)];
        let steps = build_steps(&r, StoreId(1), &target, StoreId(1));
        assert_eq!(
            steps,
            vec![
                OpStep::AddLearner { to_store: StoreId(6) },
                OpStep::RemovePeer { from_store: StoreId(5) },
            ]
        );
    }

    #[test]
    fn demoted_leader_transfers_first() {
        let r = region(&[(1, PeerRole::Voter), (2, PeerRole::Learner)], 1);
        let target = vec![(StoreId(1), PeerRole::Learner), (StoreId(2), PeerRole::Voter)];
        let steps = build_steps(&r, StoreId(1), &target, StoreId(2));
        assert_eq!(
            steps,
            vec![
                OpStep::PromoteLearner { to_store: StoreId(2) },
                OpStep::TransferLeader { from_store: StoreId(1), to_store: StoreId(2) },
                OpStep::DemoteVoter { to_store: StoreId(1) },
            ]
        );
    }
}
