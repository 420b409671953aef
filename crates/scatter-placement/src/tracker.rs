//! Selection tracker: per-group, per-store counters that decay by group.
//!
//! Every pick the selector makes is recorded here, keyed by the caller's
//! group. Counters only grow while a group is alive; a group that has not
//! been read or written for a full TTL is dropped as a whole and
//! starts again from zero on its next use.
//!
//! Peer and leader selections are tracked in separate series. Each series is
//! a sharded `DashMap`, so an increment only locks the shard holding its
//! group.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use scatter_core::StoreId;
use scatter_core::config::GC_TTL_INTERVALS;

/// Which series a selection is counted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectionKind {
    Peer,
    Leader,
}

#[derive(Debug)]
struct GroupCounts {
    counts: HashMap<StoreId, u64>,
    last_touch: Instant,
}

impl GroupCounts {
    fn new(now: Instant) -> Self {
        Self {
            counts: HashMap::new(),
            last_touch: now,
        }
    }

    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.last_touch) >= ttl
    }
}

/// TTL-decayed selection counters for one engine pool.
#[derive(Debug)]
pub struct SelectionTracker {
    peers: DashMap<String, GroupCounts>,
    leaders: DashMap<String, GroupCounts>,
    gc_interval: Duration,
    ttl: Duration,
}

impl SelectionTracker {
    /// Create a tracker sweeping every `gc_interval`; groups expire after
    /// `GC_TTL_INTERVALS` intervals without access.
    pub fn new(gc_interval: Duration) -> Self {
        Self {
            peers: DashMap::new(),
            leaders: DashMap::new(),
            gc_interval,
            ttl: gc_interval * GC_TTL_INTERVALS,
        }
    }

    pub fn gc_interval(&self) -> Duration {
        self.gc_interval
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn series(&self, kind: SelectionKind) -> &DashMap<String, GroupCounts> {
        match kind {
            SelectionKind::Peer => &self.peers,
            SelectionKind::Leader => &self.leaders,
        }
    }

    /// Count one more selection of `store` within `group`.
    pub fn record_selection(&self, group: &str, store: StoreId, kind: SelectionKind) {
        let now = Instant::now();
        let series = self.series(kind);
        let mut entry = match series.get_mut(group) {
            Some(entry) => entry,
            None => series
                .entry(group.to_string())
                .or_insert_with(|| GroupCounts::new(now)),
        };
        if entry.is_expired(now, self.ttl) {
            entry.counts.clear();
        }
        *entry.counts.entry(store).or_insert(0) += 1;
        entry.last_touch = now;
    }

    /// Run `f` over a live group, refreshing its last touch. Expired groups
    /// are removed and reported as absent.
    fn touch<R>(
        &self,
        group: &str,
        kind: SelectionKind,
        f: impl FnOnce(&GroupCounts) -> R,
    ) -> Option<R> {
        let now = Instant::now();
        let series = self.series(kind);
        {
            let mut entry = series.get_mut(group)?;
            if !entry.is_expired(now, self.ttl) {
                entry.last_touch = now;
                return Some(f(&*entry));
            }
        }
        series.remove_if(group, |_, g| g.is_expired(now, self.ttl));
        None
    }

    /// Snapshot of a group's counters, or `None` if the group is untracked.
    pub fn group_distribution(
        &self,
        group: &str,
        kind: SelectionKind,
    ) -> Option<HashMap<StoreId, u64>> {
        self.touch(group, kind, |g| g.counts.clone())
    }

    /// Selections of `store` within `group`; zero when untracked.
    pub fn count(&self, group: &str, store: StoreId, kind: SelectionKind) -> u64 {
        self.touch(group, kind, |g| g.counts.get(&store).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Selections of `store` summed over every live group.
    pub fn total_by_store(&self, store: StoreId, kind: SelectionKind) -> u64 {
        let now = Instant::now();
        self.series(kind)
            .iter()
            .filter(|g| !g.is_expired(now, self.ttl))
            .filter_map(|g| g.counts.get(&store).copied())
            .sum()
    }

    /// Names of live groups across both series.
    pub fn tracked_groups(&self) -> Vec<String> {
        let now = Instant::now();
        let mut groups: Vec<String> = self
            .peers
            .iter()
            .chain(self.leaders.iter())
            .filter(|g| !g.is_expired(now, self.ttl))
            .map(|g| g.key().clone())
            .collect();
        groups.sort();
        groups.dedup();
        groups
    }

    /// Drop every group untouched for at least the TTL. Returns the number
    /// of series entries removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        for series in [&self.peers, &self.leaders] {
            series.retain(|_, g| {
                let keep = !g.is_expired(now, self.ttl);
                if !keep {
                    removed += 1;
                }
                keep
            });
        }
        removed
    }

    /// Sweep every `gc_interval` until `cancel` fires.
    pub async fn run_gc(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            interval_ms = self.gc_interval.as_millis() as u64,
            "selection tracker gc started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.gc_interval) => {
                    let removed = self.sweep_expired();
                    if removed > 0 {
                        debug!(removed, "expired selection groups swept");
                    }
                }
                _ = cancel.cancelled() => {
                    info!("selection tracker gc shutting down");
                    break;
                }
            }
        }
    }
}
