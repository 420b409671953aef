//! scatter-state: the collaborator boundary of the region scatterer.
//!
//! Defines the traits through which the scatterer reads topology and
//! placement rules and hands off operators, plus [`MemoryCluster`], an
//! in-memory implementation of all three used by tests and embedders.
//!
//! # Architecture
//!
//! ```text
//! RegionScatterer
//!   ├── TopologyProvider (stores, peers, leaders, hot regions)
//!   ├── RuleProvider     (placement rules per region)
//!   └── OperatorSink     (execution pipeline)
//! ```
//!
//! `MemoryCluster` is `Clone` + `Send` + `Sync` (backed by `Arc`) and can be
//! shared across async tasks.

pub mod error;
pub mod memory;
pub mod provider;

pub use error::{StateError, StateResult};
pub use memory::MemoryCluster;
pub use provider::{OperatorSink, RuleProvider, TopologyProvider};
