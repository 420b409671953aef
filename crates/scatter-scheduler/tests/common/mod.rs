//! Shared fixtures for the scatter integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use scatter_core::{OpStep, Operator, PeerRole, RegionId, RegionInfo, ScatterConfig, StoreId};
use scatter_scheduler::RegionScatterer;
use scatter_state::MemoryCluster;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

/// A cluster with ordinary stores `1..=n`.
pub fn cluster_with_stores(n: u64) -> MemoryCluster {
    let cluster = MemoryCluster::new();
    for id in 1..=n {
        cluster.add_region_store(id).unwrap();
    }
    cluster
}

/// Regions `first..first + count`, each with voters on `stores` led by the
/// first of them.
pub fn add_regions(cluster: &MemoryCluster, first: u64, count: u64, stores: &[u64]) -> Vec<RegionInfo> {
    (first..first + count)
        .map(|id| cluster.add_leader_region(id, stores[0], &stores[1..]).unwrap())
        .collect()
}

pub fn test_config() -> ScatterConfig {
    ScatterConfig::default().with_rng_seed(7)
}

/// A scatterer reading from `cluster` and applying its operators to it.
pub fn scatterer(cluster: &MemoryCluster, config: ScatterConfig) -> Arc<RegionScatterer> {
    Arc::new(
        RegionScatterer::new(
            Arc::new(cluster.clone()),
            Arc::new(cluster.clone()),
            config,
            &CancellationToken::new(),
        )
        .with_sink(Arc::new(cluster.clone())),
    )
}

/// A scatterer that only builds operators.
pub fn dry_scatterer(cluster: &MemoryCluster, config: ScatterConfig) -> Arc<RegionScatterer> {
    Arc::new(RegionScatterer::new(
        Arc::new(cluster.clone()),
        Arc::new(cluster.clone()),
        config,
        &CancellationToken::new(),
    ))
}

/// Peers per store over `ids`, optionally restricted to one role.
pub fn peer_counts(cluster: &MemoryCluster, ids: &[RegionId], role: Option<PeerRole>) -> HashMap<StoreId, u64> {
    let mut counts = HashMap::new();
    for id in ids {
        let region = cluster.get_region(*id).unwrap().unwrap();
        for peer in &region.peers {
            if role.is_none_or(|r| r == peer.role) {
                *counts.entry(peer.store_id).or_insert(0) += 1;
            }
        }
    }
    counts
}

pub fn leader_counts(cluster: &MemoryCluster, ids: &[RegionId]) -> HashMap<StoreId, u64> {
    let mut counts = HashMap::new();
    for id in ids {
        let region = cluster.get_region(*id).unwrap().unwrap();
        if let Some(leader) = region.leader {
            *counts.entry(leader).or_insert(0) += 1;
        }
    }
    counts
}

/// Every store in `stores` holds `expected` ± 10%.
pub fn assert_balanced(counts: &HashMap<StoreId, u64>, stores: &[u64], expected: f64) {
    for id in stores {
        let got = counts.get(&StoreId(*id)).copied().unwrap_or(0) as f64;
        assert!(
            (got - expected).abs() <= expected * 0.1,
            "store {id} holds {got}, expected {expected} ± 10%: {counts:?}"
        );
    }
}

/// No store is removed before a leader transfer that still involves it, and
/// no store gains two peers.
pub fn check_operator(op: &Operator) {
    let mut added = Vec::new();
    for (i, step) in op.steps.iter().enumerate() {
        match *step {
            OpStep::AddLearner { to_store } => {
                assert!(!added.contains(&to_store), "store {to_store} added twice: {op:?}");
                added.push(to_store);
            }
            OpStep::RemovePeer { from_store } => {
                for later in &op.steps[i + 1..] {
                    if let OpStep::TransferLeader { from_store: f, to_store: t } = *later {
                        assert!(
                            f != from_store && t != from_store,
                            "store {from_store} removed before leader transfer: {op:?}"
                        );
                    }
                }
            }
            _ => {}
        }
    }
}

/// Region ids `1..=n`.
pub fn region_ids(n: u64) -> Vec<RegionId> {
    (1..=n).map(RegionId).collect()
}

pub const SHORT_GC: Duration = Duration::from_secs(1);
