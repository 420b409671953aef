//! Engine pool selector: picks target stores within one engine pool.
//!
//! Candidates are ranked by how often they were already picked for the same
//! group, then by how often they were picked across all groups. Ties in the
//! best tier go to the current holder when it is among them, otherwise to a
//! random member drawn from the injected [`RandomSource`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use scatter_core::{Engine, StoreId};

use crate::error::{SelectError, SelectResult};
use crate::tracker::{SelectionKind, SelectionTracker};

/// Shared, optionally seeded source of tie-break randomness.
#[derive(Debug)]
pub struct RandomSource {
    rng: Mutex<StdRng>,
}

impl RandomSource {
    /// Deterministic source, for reproducible runs.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Seeded when `seed` is set, entropy-seeded otherwise.
    pub fn from_optional_seed(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::from_seed(seed),
            None => Self::from_entropy(),
        }
    }

    /// Uniform index in `0..n`. `n` must be non-zero.
    pub fn index(&self, n: usize) -> usize {
        // A panic while holding the lock cannot leave the generator invalid.
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.gen_range(0..n)
    }
}

/// Selector for a single engine pool, backed by its own tracker.
#[derive(Debug)]
pub struct EnginePoolSelector {
    engine: Engine,
    tracker: Arc<SelectionTracker>,
    rng: Arc<RandomSource>,
}

impl EnginePoolSelector {
    pub fn new(engine: Engine, tracker: Arc<SelectionTracker>, rng: Arc<RandomSource>) -> Self {
        Self {
            engine,
            tracker,
            rng,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn tracker(&self) -> &Arc<SelectionTracker> {
        &self.tracker
    }

    /// Pick a peer target among `candidates` and record it for `group`.
    ///
    /// `source` is the store currently holding the slot; it is kept when it
    /// ranks in the best tier.
    pub fn select_store(
        &self,
        candidates: &[StoreId],
        source: Option<StoreId>,
        group: &str,
    ) -> SelectResult<StoreId> {
        let picked = self.pick(candidates, source, group, SelectionKind::Peer)?;
        self.tracker
            .record_selection(group, picked, SelectionKind::Peer);
        debug!(
            engine = %self.engine,
            group,
            store_id = %picked,
            kept = source == Some(picked),
            "peer target selected"
        );
        Ok(picked)
    }

    /// Pick a leader among `candidates` and record it for `group`.
    pub fn select_leader(
        &self,
        candidates: &[StoreId],
        current_leader: Option<StoreId>,
        group: &str,
    ) -> SelectResult<StoreId> {
        let picked = self.pick(candidates, current_leader, group, SelectionKind::Leader)?;
        self.tracker
            .record_selection(group, picked, SelectionKind::Leader);
        debug!(
            engine = %self.engine,
            group,
            store_id = %picked,
            kept = current_leader == Some(picked),
            "leader target selected"
        );
        Ok(picked)
    }

    /// Choose which holder in `current_assignment` gives up its place to
    /// `new_candidate`: the one with the highest group-scoped peer count,
    /// ties broken at random. Nothing is recorded.
    pub fn replace_for_conflict(
        &self,
        current_assignment: &[StoreId],
        new_candidate: StoreId,
        group: &str,
    ) -> SelectResult<StoreId> {
        let holders: Vec<(StoreId, u64)> = dedup(current_assignment)
            .into_iter()
            .filter(|s| *s != new_candidate)
            .map(|s| (s, self.tracker.count(group, s, SelectionKind::Peer)))
            .collect();

        let max = holders
            .iter()
            .map(|(_, c)| *c)
            .max()
            .ok_or(SelectError::ConflictUnresolved)?;
        let top: Vec<StoreId> = holders
            .iter()
            .filter(|(_, c)| *c == max)
            .map(|(s, _)| *s)
            .collect();

        let evicted = top[self.rng.index(top.len())];
        debug!(
            engine = %self.engine,
            group,
            store_id = %evicted,
            candidate = %new_candidate,
            "conflicting holder evicted"
        );
        Ok(evicted)
    }

    fn pick(
        &self,
        candidates: &[StoreId],
        preferred: Option<StoreId>,
        group: &str,
        kind: SelectionKind,
    ) -> SelectResult<StoreId> {
        let ranked: Vec<(StoreId, (u64, u64))> = dedup(candidates)
            .into_iter()
            .map(|s| {
                let rank = (
                    self.tracker.count(group, s, kind),
                    self.tracker.total_by_store(s, kind),
                );
                (s, rank)
            })
            .collect();

        let best = ranked
            .iter()
            .map(|(_, r)| *r)
            .min()
            .ok_or(SelectError::NoEligibleTarget)?;
        let tier: Vec<StoreId> = ranked
            .iter()
            .filter(|(_, r)| *r == best)
            .map(|(s, _)| *s)
            .collect();

        if let Some(p) = preferred.filter(|p| tier.contains(p)) {
            return Ok(p);
        }
        Ok(tier[self.rng.index(tier.len())])
    }
}

/// Order-preserving dedup.
fn dedup(stores: &[StoreId]) -> Vec<StoreId> {
    let mut seen = HashSet::with_capacity(stores.len());
    stores.iter().copied().filter(|s| seen.insert(*s)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn selector(seed: u64) -> EnginePoolSelector {
        EnginePoolSelector::new(
            Engine::Ordinary,
            Arc::new(SelectionTracker::new(Duration::from_secs(60))),
            Arc::new(RandomSource::from_seed(seed)),
        )
    }

    fn ids(raw: &[u64]) -> Vec<StoreId> {
        raw.iter().copied().map(StoreId).collect()
    }

    #[test]
    fn empty_candidates() {
        let sel = selector(1);
        assert_eq!(
            sel.select_store(&[], None, "g"),
            Err(SelectError::NoEligibleTarget)
        );
        assert_eq!(
            sel.select_leader(&[], None, "g"),
            Err(SelectError::NoEligibleTarget)
        );
    }

    #[test]
    fn picks_least_selected_in_group() {
        let sel = selector(1);
        for _ in 0..3 {
            sel.tracker.record_selection("g", StoreId(1), SelectionKind::Peer);
            sel.tracker.record_selection("g", StoreId(2), SelectionKind::Peer);
        }
        sel.tracker.record_selection("g", StoreId(3), SelectionKind::Peer);

        let picked = sel.select_store(&ids(&[1, 2, 3]), Some(StoreId(1)), "g").unwrap();
        assert_eq!(picked, StoreId(3));
        assert_eq!(sel.tracker.count("g", StoreId(3), SelectionKind::Peer), 2);
    }

    #[test]
    fn cluster_total_breaks_group_ties() {
        let sel = selector(1);
        sel.tracker.record_selection("other", StoreId(1), SelectionKind::Peer);
        sel.tracker.record_selection("other", StoreId(2), SelectionKind::Peer);

        let picked = sel.select_store(&ids(&[1, 2, 3]), None, "g").unwrap();
        assert_eq!(picked, StoreId(3));
    }

    #[test]
    fn source_kept_when_in_best_tier() {
        for seed in 0..20 {
            let fresh = selector(seed);
            let picked = fresh.select_store(&ids(&[1, 2, 3]), Some(StoreId(2)), "g").unwrap();
            assert_eq!(picked, StoreId(2));
        }

        let sel = selector(1);
        sel.tracker.record_selection("g", StoreId(2), SelectionKind::Peer);
        let picked = sel.select_store(&ids(&[1, 2]), Some(StoreId(2)), "g").unwrap();
        assert_eq!(picked, StoreId(1));
    }

    #[test]
    fn random_ties_spread_evenly() {
        let sel = selector(42);
        let candidates = ids(&[1, 2, 3, 4]);
        let mut counts: HashMap<StoreId, u64> = HashMap::new();
        for _ in 0..400 {
            let s = sel.select_store(&candidates, None, "g").unwrap();
            *counts.entry(s).or_default() += 1;
        }
        // Least-selected ranking keeps every store within one of the others.
        assert!(counts.values().all(|c| *c == 100));
    }

    #[test]
    fn leader_series_is_separate() {
        let sel = selector(1);
        sel.tracker.record_selection("g", StoreId(1), SelectionKind::Peer);
        sel.tracker.record_selection("g", StoreId(1), SelectionKind::Peer);

        let leader = sel.select_leader(&ids(&[1, 2]), Some(StoreId(1)), "g").unwrap();
        assert_eq!(leader, StoreId(1));
        assert_eq!(sel.tracker.count("g", StoreId(1), SelectionKind::Leader), 1);
        assert_eq!(sel.tracker.count("g", StoreId(1), SelectionKind::Peer), 2);
    }

    #[test]
    fn conflict_evicts_busiest_holder() {
        let sel = selector(3);
        for _ in 0..5 {
            sel.tracker.record_selection("g", StoreId(1), SelectionKind::Peer);
        }
        sel.tracker.record_selection("g", StoreId(2), SelectionKind::Peer);
        sel.tracker.record_selection("g", StoreId(3), SelectionKind::Peer);

        let evicted = sel.replace_for_conflict(&ids(&[1, 2, 3]), StoreId(4), "g").unwrap();
        assert_eq!(evicted, StoreId(1));
        // Nothing recorded.
        assert_eq!(sel.tracker.count("g", StoreId(4), SelectionKind::Peer), 0);
        assert_eq!(sel.tracker.count("g", StoreId(1), SelectionKind::Peer), 5);
    }

    #[test]
    fn conflict_never_evicts_candidate() {
        let sel = selector(3);
        for _ in 0..9 {
            sel.tracker.record_selection("g", StoreId(4), SelectionKind::Peer);
        }
        let evicted = sel.replace_for_conflict(&ids(&[4, 2]), StoreId(4), "g").unwrap();
        assert_eq!(evicted, StoreId(2));
    }

    #[test]
    fn conflict_without_holders() {
        let sel = selector(3);
        assert_eq!(
            sel.replace_for_conflict(&ids(&[4]), StoreId(4), "g"),
            Err(SelectError::ConflictUnresolved)
        );
    }

    #[test]
    fn seeded_sources_agree() {
        let a = RandomSource::from_seed(9);
        let b = RandomSource::from_seed(9);
        let xs: Vec<usize> = (0..16).map(|_| a.index(10)).collect();
        let ys: Vec<usize> = (0..16).map(|_| b.index(10)).collect();
        assert_eq!(xs, ys);
    }
}
