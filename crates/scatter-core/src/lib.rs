//! scatter-core: shared model for the region scatter crates.
//!
//! Holds the cluster snapshot types (stores, regions, peers, placement
//! rules), the operator model the scatterer emits, and the `scatter.toml`
//! configuration.

pub mod config;
pub mod operator;
pub mod types;

pub use config::ScatterConfig;
pub use operator::{OpPriority, OpStep, Operator, SCATTER_REGION_DESC};
pub use types::*;
