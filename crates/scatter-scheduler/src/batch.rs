//! Batch coordinator: scatters many regions with bounded concurrency.
//!
//! Regions are independent: each one ends up in `operators`, in `failures`,
//! or in neither when it was already balanced. A failing region never stops
//! the rest of the batch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scatter_core::{Operator, RegionId, RegionInfo, ScatterConfig};
use scatter_state::StateError;

use crate::error::{ScatterError, ScatterResult};
use crate::scatterer::RegionScatterer;

/// Knobs for one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    /// Maximum regions evaluated at once. Zero is treated as one.
    pub concurrency: usize,
    /// Extra attempts for retryable failures, capped by the scatterer's
    /// `max_retry_limit`.
    pub retry_limit: u32,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from_config(&ScatterConfig::default())
    }
}

impl BatchOptions {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            retry_limit: 0,
        }
    }

    pub fn from_config(config: &ScatterConfig) -> Self {
        Self::new(config.default_concurrency())
    }

    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }
}

/// Per-region results of a batch.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub operators: HashMap<RegionId, Operator>,
    pub failures: HashMap<RegionId, ScatterError>,
}

impl BatchResult {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

impl RegionScatterer {
    /// Scatter `regions` within `group`, at most `opts.concurrency` at a time.
    ///
    /// Once `cancel` fires no further regions are started; those are
    /// reported as [`ScatterError::Cancelled`]. Regions already running
    /// finish.
    pub async fn scatter_regions(
        self: &Arc<Self>,
        regions: Vec<RegionInfo>,
        group: &str,
        opts: &BatchOptions,
        cancel: &CancellationToken,
    ) -> BatchResult {
        let total = regions.len();
        let semaphore = Arc::new(Semaphore::new(opts.concurrency.max(1)));
        let retry_limit = opts.retry_limit.min(self.config().max_retry_limit());
        let group: Arc<str> = Arc::from(group);

        let mut result = BatchResult::default();
        let mut workers = JoinSet::new();
        let mut task_regions = HashMap::new();

        for region in regions {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                result.failures.insert(region.id, ScatterError::Cancelled);
                continue;
            };

            let region_id = region.id;
            let this = Arc::clone(self);
            let group = Arc::clone(&group);
            let cancel = cancel.clone();
            let handle = workers.spawn(async move {
                // Released when the region is done.
                let _permit = permit;
                this.scatter_with_retry(region, &group, retry_limit, &cancel)
                    .await
            });
            task_regions.insert(handle.id(), region_id);
        }

        while let Some(joined) = workers.join_next_with_id().await {
            match joined {
                Ok((id, outcome)) => {
                    let Some(region_id) = task_regions.remove(&id) else {
                        continue;
                    };
                    match outcome {
                        Ok(Some(op)) => {
                            result.operators.insert(region_id, op);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            result.failures.insert(region_id, e);
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "scatter worker failed");
                    if let Some(region_id) = task_regions.remove(&e.id()) {
                        result
                            .failures
                            .insert(region_id, ScatterError::Worker(e.to_string()));
                    }
                }
            }
        }

        info!(
            group = &*group,
            regions = total,
            operators = result.operators.len(),
            failures = result.failures.len(),
            "batch scatter finished"
        );
        result
    }

    /// Resolve `ids` through the topology provider, then scatter them.
    ///
    /// Unknown ids are recorded as [`ScatterError::RegionNotFound`].
    pub async fn scatter_regions_by_id(
        self: &Arc<Self>,
        ids: &[RegionId],
        group: &str,
        opts: &BatchOptions,
        cancel: &CancellationToken,
    ) -> ScatterResult<BatchResult> {
        if ids.is_empty() {
            return Err(ScatterError::EmptyRegions);
        }

        let mut regions = Vec::with_capacity(ids.len());
        let mut unresolved = HashMap::new();
        for &id in ids {
            match self.resolve_region(id) {
                Ok(region) => regions.push(region),
                Err(e) => {
                    unresolved.insert(id, e);
                }
            }
        }

        let mut result = self.scatter_regions(regions, group, opts, cancel).await;
        result.failures.extend(unresolved);
        Ok(result)
    }

    fn resolve_region(&self, id: RegionId) -> ScatterResult<RegionInfo> {
        self.topology().region(id).map_err(|e| match e {
            StateError::NotFound(_) => ScatterError::RegionNotFound(id),
            other => ScatterError::Collaborator(other),
        })
    }

    /// Re-run retryable failures with exponential backoff, re-reading the
    /// region before each new attempt.
    async fn scatter_with_retry(
        &self,
        mut region: RegionInfo,
        group: &str,
        retry_limit: u32,
        cancel: &CancellationToken,
    ) -> ScatterResult<Option<Operator>> {
        let mut attempt = 0;
        loop {
            let err = match self.scatter_region(&region, group) {
                Err(e) if e.is_retryable() && attempt < retry_limit => e,
                other => return other,
            };

            let delay = self.backoff(attempt);
            attempt += 1;
            debug!(
                region_id = %region.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying region scatter"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(err),
                _ = tokio::time::sleep(delay) => {}
            }
            region = self.resolve_region(region.id)?;
        }
    }

    /// `min(max_backoff, 2^attempt * initial_backoff)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let config = self.config();
        let factor = 2u32.saturating_pow(attempt);
        config
            .initial_backoff()
            .saturating_mul(factor)
            .min(config.max_backoff())
    }
}
