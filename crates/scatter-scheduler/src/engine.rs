//! Engine pools: one selector/tracker pair per storage engine.
//!
//! The ordinary pool exists from the start; a special pool is created the
//! first time a region touches a store of that engine. Every pool's tracker
//! gets its own sweep task, bound to the pools' cancellation token.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

use scatter_core::Engine;
use scatter_placement::{EnginePoolSelector, RandomSource, SelectionTracker};

pub struct EnginePools {
    pools: DashMap<Engine, Arc<EnginePoolSelector>>,
    gc_interval: Duration,
    rng: Arc<RandomSource>,
    handle: Handle,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl EnginePools {
    /// Create the pool set with its ordinary pool.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(gc_interval: Duration, rng: Arc<RandomSource>, cancel: CancellationToken) -> Self {
        let pools = Self {
            pools: DashMap::new(),
            gc_interval,
            rng,
            handle: Handle::current(),
            cancel,
            tasks: TaskTracker::new(),
        };
        pools.get(&Engine::Ordinary);
        pools
    }

    /// Selector for `engine`, created on first use.
    pub fn get(&self, engine: &Engine) -> Arc<EnginePoolSelector> {
        if let Some(pool) = self.pools.get(engine) {
            return Arc::clone(pool.value());
        }
        let pool = self
            .pools
            .entry(engine.clone())
            .or_insert_with(|| self.create(engine));
        Arc::clone(pool.value())
    }

    /// Selector for `engine` if the pool already exists.
    pub fn peek(&self, engine: &Engine) -> Option<Arc<EnginePoolSelector>> {
        self.pools.get(engine).map(|p| Arc::clone(p.value()))
    }

    pub fn ordinary(&self) -> Arc<EnginePoolSelector> {
        self.get(&Engine::Ordinary)
    }

    pub fn engines(&self) -> Vec<Engine> {
        let mut engines: Vec<Engine> = self.pools.iter().map(|p| p.key().clone()).collect();
        engines.sort();
        engines
    }

    /// Sweep every pool's tracker now. Returns the total removed.
    pub fn sweep_expired(&self) -> usize {
        let pools: Vec<Arc<EnginePoolSelector>> =
            self.pools.iter().map(|p| p.value().clone()).collect();
        pools.iter().map(|p| p.tracker().sweep_expired()).sum()
    }

    /// Stop every sweep task and wait for them to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }

    fn create(&self, engine: &Engine) -> Arc<EnginePoolSelector> {
        let tracker = Arc::new(SelectionTracker::new(self.gc_interval));
        self.tasks
            .spawn_on(tracker.clone().run_gc(self.cancel.clone()), &self.handle);
        debug!(engine = %engine, "engine pool created");
        Arc::new(EnginePoolSelector::new(
            engine.clone(),
            tracker,
            self.rng.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scatter_core::StoreId;
    use scatter_placement::SelectionKind;

    fn pools() -> EnginePools {
        EnginePools::new(
            Duration::from_secs(1),
            Arc::new(RandomSource::from_seed(1)),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn ordinary_pool_exists_up_front() {
        let pools = pools();
        assert_eq!(pools.engines(), vec![Engine::Ordinary]);
        assert!(pools.peek(&Engine::Special("tiflash".into())).is_none());
        pools.shutdown().await;
    }

    #[tokio::test]
    async fn special_pools_are_lazy_and_shared() {
        let pools = pools();
        let tiflash = Engine::Special("tiflash".into());
        let a = pools.get(&tiflash);
        let b = pools.get(&tiflash);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pools.engines().len(), 2);
        assert_eq!(a.engine(), &tiflash);
        pools.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn pool_trackers_are_swept_in_background() {
        let pools = pools();
        let tiflash = pools.get(&Engine::Special("tiflash".into()));
        tiflash
            .tracker()
            .record_selection("g", StoreId(1), SelectionKind::Peer);
        pools
            .ordinary()
            .tracker()
            .record_selection("g", StoreId(1), SelectionKind::Peer);

        tokio::time::sleep(Duration::from_millis(4500)).await;

        assert!(tiflash.tracker().tracked_groups().is_empty());
        assert!(pools.ordinary().tracker().tracked_groups().is_empty());
        assert_eq!(pools.sweep_expired(), 0);
        pools.shutdown().await;
    }
}
