//! scatter-scheduler: region scattering and batch coordination.
//!
//! Spreads the peers and leaders of regions evenly across the stores of
//! each storage engine pool. The scatterer:
//!
//! - Checks that a region can be moved (voter leader, not hot, fully replicated)
//! - Picks a target store per peer slot and a target leader through the
//!   per-engine selectors of `scatter-placement`
//! - Diffs target vs current placement into an `Operator`
//! - Hands operators to an optional `OperatorSink`
//! - Runs batches of regions with bounded concurrency, retry and cancellation
//!
//! # Architecture
//!
//! ```text
//! RegionScatterer
//!   ├── TopologyProvider / RuleProvider (read cluster snapshots)
//!   ├── EnginePools
//!   │   ├── ordinary  → EnginePoolSelector + SelectionTracker (+ sweep task)
//!   │   └── <engine>  → EnginePoolSelector + SelectionTracker (+ sweep task)
//!   ├── OperatorSink (optional hand-off)
//!   └── ScatterStats (outcome counters)
//! ```

pub mod batch;
pub mod engine;
pub mod error;
pub mod scatterer;
pub mod stats;

pub use batch::{BatchOptions, BatchResult};
pub use engine::EnginePools;
pub use error::{ScatterError, ScatterResult};
pub use scatterer::RegionScatterer;
pub use stats::{ScatterOutcome, ScatterStats, ScatterStatsSnapshot};
