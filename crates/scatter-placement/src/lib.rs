//! scatter-placement: store selection for the region scatterer.
//!
//! This crate decides *where* replicas and leaders of a region should go
//! within one engine pool. It does not read topology or build operators
//! (that's `scatter-scheduler`); it ranks candidate stores and remembers
//! what it picked.
//!
//! # Components
//!
//! - **`tracker`**: Per-group selection counters with TTL expiry
//! - **`selector`**: Least-selected ranking, leader choice, conflict eviction

pub mod error;
pub mod selector;
pub mod tracker;

pub use error::{SelectError, SelectResult};
pub use selector::{EnginePoolSelector, RandomSource};
pub use tracker::{SelectionKind, SelectionTracker};
