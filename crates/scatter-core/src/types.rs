//! Shared cluster model used across the scatter crates.
//!
//! Stores and regions are read-only snapshots handed out by the topology
//! provider; nothing in this module owns live cluster state.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Label key that marks a store as belonging to a specialized engine pool.
pub const DEFAULT_ENGINE_LABEL: &str = "engine";

/// Identifier of a storage node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(pub u64);

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a replicated partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(pub u64);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Stores ─────────────────────────────────────────────────────────

/// Lifecycle state of a store as reported by the topology provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreState {
    Up,
    Disconnected,
    Down,
    Offline,
    Tombstone,
}

/// The storage engine pool a store belongs to.
///
/// Stores without the engine label form the ordinary pool; every distinct
/// label value forms its own special pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    Ordinary,
    Special(String),
}

impl Engine {
    /// Map an optional engine label value to a pool key.
    pub fn from_label(value: Option<&str>) -> Self {
        match value {
            None | Some("") => Engine::Ordinary,
            Some(v) => Engine::Special(v.to_string()),
        }
    }

    pub fn is_ordinary(&self) -> bool {
        matches!(self, Engine::Ordinary)
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Engine::Ordinary => f.write_str("ordinary"),
            Engine::Special(name) => f.write_str(name),
        }
    }
}

/// Snapshot of a single store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreInfo {
    pub id: StoreId,
    pub state: StoreState,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl StoreInfo {
    /// An `Up` store with no labels.
    pub fn new(id: StoreId) -> Self {
        Self {
            id,
            state: StoreState::Up,
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Engine pool this store belongs to, derived from `engine_label`.
    pub fn engine(&self, engine_label: &str) -> Engine {
        Engine::from_label(self.label(engine_label))
    }

    /// Only stores that are up may receive new peers.
    pub fn is_available(&self) -> bool {
        self.state == StoreState::Up
    }
}

// ── Regions ────────────────────────────────────────────────────────

/// Replica role inside a region's consensus group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRole {
    Voter,
    Learner,
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerRole::Voter => f.write_str("voter"),
            PeerRole::Learner => f.write_str("learner"),
        }
    }
}

/// A region replica placed on a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: u64,
    pub store_id: StoreId,
    pub role: PeerRole,
}

/// Snapshot of a region: its peers and the store of its leader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionInfo {
    pub id: RegionId,
    pub peers: Vec<Peer>,
    pub leader: Option<StoreId>,
}

impl RegionInfo {
    pub fn new(id: RegionId, peers: Vec<Peer>, leader: Option<StoreId>) -> Self {
        Self { id, peers, leader }
    }

    /// The leader peer, if the leader store holds a voter of this region.
    pub fn leader_peer(&self) -> Option<&Peer> {
        let leader = self.leader?;
        self.peers
            .iter()
            .find(|p| p.store_id == leader && p.role == PeerRole::Voter)
    }

    pub fn peer_on(&self, store_id: StoreId) -> Option<&Peer> {
        self.peers.iter().find(|p| p.store_id == store_id)
    }

    pub fn store_ids(&self) -> impl Iterator<Item = StoreId> + '_ {
        self.peers.iter().map(|p| p.store_id)
    }
}

// ── Placement rules ────────────────────────────────────────────────

/// Operator of a label constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelOp {
    In,
    NotIn,
    Exists,
    NotExists,
}

/// A single label requirement a store must satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelConstraint {
    pub key: String,
    pub op: LabelOp,
    #[serde(default)]
    pub values: Vec<String>,
}

impl LabelConstraint {
    pub fn new(key: &str, op: LabelOp, values: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            op,
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn matches(&self, store: &StoreInfo) -> bool {
        let value = store.label(&self.key);
        match self.op {
            LabelOp::In => value.is_some_and(|v| self.values.iter().any(|x| x == v)),
            LabelOp::NotIn => !value.is_some_and(|v| self.values.iter().any(|x| x == v)),
            LabelOp::Exists => value.is_some(),
            LabelOp::NotExists => value.is_none(),
        }
    }
}

/// A placement rule: how many replicas of which role, on which stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub group_id: String,
    pub id: String,
    pub role: PeerRole,
    pub count: usize,
    #[serde(default)]
    pub label_constraints: Vec<LabelConstraint>,
}

impl Rule {
    /// The rule every region falls back to: `count` voters, anywhere.
    pub fn default_voters(count: usize) -> Self {
        Self {
            group_id: "pd".to_string(),
            id: "default".to_string(),
            role: PeerRole::Voter,
            count,
            label_constraints: Vec::new(),
        }
    }

    /// Whether `store` satisfies every label constraint of this rule.
    pub fn matches(&self, store: &StoreInfo) -> bool {
        self.label_constraints.iter().all(|c| c.matches(store))
    }

    /// The engine pool this rule targets, read from an `In` constraint on
    /// the engine label. Rules without one govern the ordinary pool.
    pub fn engine(&self, engine_label: &str) -> Engine {
        let value = self
            .label_constraints
            .iter()
            .find(|c| c.key == engine_label && c.op == LabelOp::In)
            .and_then(|c| c.values.first());
        Engine::from_label(value.map(String::as_str))
    }
}
