//! Pool Aggregation
//!
//! Fan-out of a per-pool query over one pool or every pool in the cluster.
//! Each pool gets its own scoped I/O context, released as soon as that pool's
//! query finishes. The merge is all-or-nothing: the first failing pool aborts
//! the aggregation and no partial map is returned.

use crate::controlplane::pool::{PoolAdmin, PoolIoSummary, PoolSelector, PoolSummary};
use crate::controlplane::session::{ClusterSession, PoolContextGuard};
use crate::domain::ports::{ClusterClientRef, ImageInfo};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Sequential by default
pub const DEFAULT_MAX_CONCURRENCY: usize = 1;

// =============================================================================
// Per-Pool Queries
// =============================================================================

/// A query run once per selected pool
#[async_trait]
pub trait PoolQuery: Send + Sync {
    type Output: Serialize + Send;

    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Run against one pool's context
    async fn query(&self, context: &PoolContextGuard) -> Result<Self::Output>;
}

/// Capacity summary per pool
pub struct PoolSummaryQuery;

#[async_trait]
impl PoolQuery for PoolSummaryQuery {
    type Output = PoolSummary;

    fn name(&self) -> &'static str {
        "pool-summary"
    }

    async fn query(&self, context: &PoolContextGuard) -> Result<PoolSummary> {
        let stat = context.pool_stats().await?;
        Ok(PoolSummary::from_stat(&stat))
    }
}

/// I/O counters per pool
pub struct PoolIoQuery;

#[async_trait]
impl PoolQuery for PoolIoQuery {
    type Output = PoolIoSummary;

    fn name(&self) -> &'static str {
        "pool-io"
    }

    async fn query(&self, context: &PoolContextGuard) -> Result<PoolIoSummary> {
        let stat = context.pool_stats().await?;
        Ok(PoolIoSummary::from_stat(&stat))
    }
}

/// Metadata of every image in a pool, as a list of one-entry maps
pub struct VolumeInfoQuery;

#[async_trait]
impl PoolQuery for VolumeInfoQuery {
    type Output = Vec<BTreeMap<String, ImageInfo>>;

    fn name(&self) -> &'static str {
        "volume-info"
    }

    async fn query(&self, context: &PoolContextGuard) -> Result<Self::Output> {
        let names = context.list_images().await?;
        let mut volumes = Vec::with_capacity(names.len());

        for name in names {
            let image = context.open_image(&name).await?;
            let info = image.stat().await?;
            debug!(
                "Image {}/{}: {} bytes, prefix {}",
                context.pool_name(),
                name,
                info.size,
                info.block_name_prefix
            );

            let mut entry = BTreeMap::new();
            entry.insert(name, info);
            volumes.push(entry);
        }

        Ok(volumes)
    }
}

// =============================================================================
// Aggregation Service
// =============================================================================

/// Runs per-pool queries over a pool selection
pub struct AggregationService {
    client: ClusterClientRef,
    pools: PoolAdmin,
    max_concurrency: usize,
}

impl AggregationService {
    pub fn new(client: ClusterClientRef) -> Self {
        Self {
            pools: PoolAdmin::new(client.clone()),
            client,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    /// Bound the number of pools queried at once
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Run `query` on every selected pool and merge the results by pool name
    pub async fn aggregate<Q: PoolQuery>(
        &self,
        selector: &PoolSelector,
        query: &Q,
    ) -> Result<BTreeMap<String, Q::Output>> {
        let session = ClusterSession::open_cluster(self.client.as_ref()).await?;
        let pools = self.pools.resolve(&session, selector).await?;

        debug!(
            "Aggregating {} over {} pool(s) (concurrency {})",
            query.name(),
            pools.len(),
            self.max_concurrency
        );

        let session = &session;
        let results: Vec<(String, Q::Output)> = stream::iter(pools)
            .map(move |pool| async move {
                let context = session.open_pool(&pool).await?;
                let output = query.query(&context).await?;
                drop(context);
                Ok::<_, Error>((pool, output))
            })
            .buffered(self.max_concurrency)
            .try_collect()
            .await?;

        Ok(results.into_iter().collect())
    }
}
