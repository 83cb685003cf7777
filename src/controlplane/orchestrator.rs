//! Main Orchestrator - The "Brain"
//!
//! Entry points called by the HTTP layer. Each one sequences the pool and
//! volume steps for a single request and collapses any internal error into
//! exactly one status from the catalog, logging the full error at that point.
//!
//! Mutating operations are serialized per key: per pool for pool
//! administration, per (pool, volume) for volume workflows.

use crate::controlplane::aggregation::{
    AggregationService, PoolIoQuery, PoolSummaryQuery, VolumeInfoQuery, DEFAULT_MAX_CONCURRENCY,
};
use crate::controlplane::pool::{PoolAdmin, PoolIoSummary, PoolSelector, PoolSummary};
use crate::controlplane::status::{Failure, Status};
use crate::controlplane::volume::{Volume, VolumeLifecycle, VolumeState};
use crate::domain::ports::{
    ClusterClientRef, DeviceMapperRef, ImageInfo, VolumeRecord, VolumeStoreRef,
};
use crate::error::{Error, SessionStage};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

/// Result of an orchestrated operation
pub type Outcome<T> = std::result::Result<T, Failure>;

/// Volume listing: pool -> list of `{image: info}` entries
pub type VolumeListing = BTreeMap<String, Vec<BTreeMap<String, ImageInfo>>>;

// =============================================================================
// Orchestrator Configuration
// =============================================================================

/// Configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Pools queried at once during aggregation
    pub max_concurrency: usize,
    /// Undo completed CreateDisk steps when a later step fails
    pub rollback_on_failure: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            rollback_on_failure: false,
        }
    }
}

// =============================================================================
// Keyed Locks
// =============================================================================

/// Per-key mutual exclusion; entries are dropped once nobody holds or awaits them
#[derive(Default)]
pub struct VolumeLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl VolumeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn acquire(&self, key: String) -> KeyGuard<'_> {
        let lock = self.locks.entry(key.clone()).or_default().clone();
        let guard = lock.lock_owned().await;

        KeyGuard {
            locks: self,
            key,
            guard: Some(guard),
        }
    }

    /// Exclusive access to one pool
    pub async fn pool(&self, pool: &str) -> KeyGuard<'_> {
        self.acquire(format!("pool:{}", pool)).await
    }

    /// Exclusive access to one volume
    pub async fn volume(&self, pool: &str, volume: &str) -> KeyGuard<'_> {
        self.acquire(format!("volume:{}/{}", pool, volume)).await
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Held key; releasing the last holder removes the entry
pub struct KeyGuard<'a> {
    locks: &'a VolumeLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

// =============================================================================
// Compensation
// =============================================================================

/// Undo step recorded after a CreateDisk step succeeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compensation {
    RemoveImage,
    Unmap,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Orchestrates pool and volume workflows for the API layer
pub struct Orchestrator {
    config: OrchestratorConfig,
    backend: String,
    pools: PoolAdmin,
    aggregation: AggregationService,
    volumes: VolumeLifecycle,
    store: VolumeStoreRef,
    locks: VolumeLocks,
}

impl Orchestrator {
    /// Create a new orchestrator
    pub fn new(
        config: OrchestratorConfig,
        client: ClusterClientRef,
        mapper: DeviceMapperRef,
        store: VolumeStoreRef,
    ) -> Arc<Self> {
        info!(
            "Orchestrator using {} backend (aggregation concurrency {}, rollback {})",
            client.backend_name(),
            config.max_concurrency,
            config.rollback_on_failure
        );

        Arc::new(Self {
            backend: client.backend_name().to_string(),
            pools: PoolAdmin::new(client.clone()),
            aggregation: AggregationService::new(client.clone())
                .with_max_concurrency(config.max_concurrency),
            volumes: VolumeLifecycle::new(client, mapper),
            store,
            locks: VolumeLocks::new(),
            config,
        })
    }

    /// Name of the cluster backend in use
    pub fn backend_name(&self) -> &str {
        &self.backend
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Pools
    // -------------------------------------------------------------------------

    /// Create a pool
    pub async fn create_pool(&self, pool: &str) -> Outcome<()> {
        let _lock = self.locks.pool(pool).await;

        self.pools.create(pool).await.map_err(|e| {
            let reason = e.cluster_reason().map(str::to_string);
            collapse(Status::CreatePool, "create pool", pool, &e).with_detail(reason.as_deref())
        })
    }

    /// Delete a pool
    pub async fn delete_pool(&self, pool: &str) -> Outcome<()> {
        let _lock = self.locks.pool(pool).await;

        self.pools.delete(pool).await.map_err(|e| {
            let reason = e.cluster_reason().map(str::to_string);
            collapse(Status::DelPool, "delete pool", pool, &e).with_detail(reason.as_deref())
        })
    }

    /// Change the replica count of a pool
    pub async fn set_pool_replica_size(&self, pool: &str, size: u32) -> Outcome<()> {
        let _lock = self.locks.pool(pool).await;

        self.pools
            .set_replica_factor(pool, size)
            .await
            .map(|_| ())
            .map_err(|e| {
                let reason = e.cluster_reason().map(str::to_string);
                collapse(Status::ModPool, "set pool size", pool, &e).with_detail(reason.as_deref())
            })
    }

    /// Capacity summary of the selected pools
    pub async fn info_pools(&self, selector: &PoolSelector) -> Outcome<BTreeMap<String, PoolSummary>> {
        self.aggregation
            .aggregate(selector, &PoolSummaryQuery)
            .await
            .map_err(|e| collapse_lookup(Status::InfoPool, "info pool", selector, &e))
    }

    /// I/O counters of the selected pools
    pub async fn info_pools_io(
        &self,
        selector: &PoolSelector,
    ) -> Outcome<BTreeMap<String, PoolIoSummary>> {
        self.aggregation
            .aggregate(selector, &PoolIoQuery)
            .await
            .map_err(|e| collapse_lookup(Status::InfoPoolIo, "info pool io", selector, &e))
    }

    // -------------------------------------------------------------------------
    // Volumes
    // -------------------------------------------------------------------------

    /// Image metadata of every volume in the selected pools
    pub async fn info_volumes(&self, selector: &PoolSelector) -> Outcome<VolumeListing> {
        self.aggregation
            .aggregate(selector, &VolumeInfoQuery)
            .await
            .map_err(|e| collapse_lookup(Status::InfoVolumes, "info volumes", selector, &e))
    }

    /// Create, map and record a volume
    ///
    /// Each step reports its own status. The returned failure carries the
    /// state the volume had reached, after compensation when rollback is on.
    pub async fn create_disk(&self, pool: &str, name: &str, size: u64) -> Outcome<Volume> {
        let _lock = self.locks.volume(pool, name).await;
        let target = format!("{}/{}", pool, name);

        let mut volume = Volume::new(name, pool, size);
        let mut undo = Vec::new();

        let created = self.volumes.create(&mut volume).await;
        if volume.state() == VolumeState::Allocated {
            undo.push(Compensation::RemoveImage);
        }
        if let Err(e) = created {
            let failure = collapse(Status::CreateVolume, "create volume", &target, &e);
            self.compensate(&mut volume, undo).await;
            return Err(failure.with_progress(volume.state()));
        }

        if let Err(e) = self.volumes.map(&mut volume).await {
            let status = match e {
                Error::CommandTimeout { .. } => Status::Timeout,
                _ => Status::MapVolume,
            };
            let failure = collapse(status, "map volume", &target, &e);
            self.compensate(&mut volume, undo).await;
            return Err(failure.with_progress(volume.state()));
        }
        undo.push(Compensation::Unmap);

        if let Err(e) = self
            .volumes
            .persist_create_result(&mut volume, self.store.as_ref())
            .await
        {
            let failure = collapse(Status::CreateDisk, "persist volume", &target, &e);
            self.compensate(&mut volume, undo).await;
            return Err(failure.with_progress(volume.state()));
        }

        info!(
            "Disk created: {} ({} bytes) at {}",
            target,
            volume.size(),
            volume.device_path()
        );
        Ok(volume)
    }

    /// Remove a volume's image
    pub async fn delete_volume(&self, pool: &str, name: &str) -> Outcome<()> {
        let _lock = self.locks.volume(pool, name).await;
        let target = format!("{}/{}", pool, name);

        let mut volume = Volume::existing(name, pool);
        self.volumes.remove(&mut volume).await.map_err(|e| {
            let reason = e.cluster_reason().map(str::to_string);
            collapse(Status::DelVolume, "delete volume", &target, &e).with_detail(reason.as_deref())
        })
    }

    /// Resize a volume's image
    pub async fn resize_volume(&self, pool: &str, name: &str, size: u64) -> Outcome<()> {
        let _lock = self.locks.volume(pool, name).await;
        let target = format!("{}/{}", pool, name);

        let mut volume = Volume::existing(name, pool);
        self.volumes.resize(&mut volume, size).await.map_err(|e| {
            // Only pool and image open failures carry cluster text
            let reason = match &e {
                Error::Session {
                    stage: SessionStage::OpenContext,
                    reason,
                } => Some(reason.clone()),
                Error::ResizeFailed { .. } => None,
                other => other.cluster_reason().map(str::to_string),
            };
            collapse(Status::ResizeVolume, "resize volume", &target, &e)
                .with_detail(reason.as_deref())
        })
    }

    /// Recorded volumes
    pub async fn volume_records(&self) -> Outcome<Vec<VolumeRecord>> {
        self.store
            .list()
            .await
            .map_err(|e| collapse(Status::InfoVolumes, "list volume records", "store", &e))
    }

    async fn compensate(&self, volume: &mut Volume, undo: Vec<Compensation>) {
        if !self.config.rollback_on_failure {
            debug!(
                "Rollback disabled; {}/{} left {}",
                volume.pool(),
                volume.name(),
                volume.state()
            );
            return;
        }

        for step in undo.into_iter().rev() {
            let result = match step {
                Compensation::Unmap => self.volumes.unmap(volume).await,
                Compensation::RemoveImage => self.volumes.remove(volume).await,
            };

            if let Err(e) = result {
                warn!(
                    "Compensation {:?} for {}/{} failed: {}",
                    step,
                    volume.pool(),
                    volume.name(),
                    e
                );
                return;
            }
        }

        info!(
            "Rolled back {}/{} to {}",
            volume.pool(),
            volume.name(),
            volume.state()
        );
    }
}

/// Log an internal error and reduce it to a status
fn collapse(status: Status, operation: &str, target: &str, err: &Error) -> Failure {
    if err.is_transient() {
        warn!("{} {} failed ({}): {}", operation, target, status.code(), err);
    } else {
        error!("{} {} failed ({}): {}", operation, target, status.code(), err);
    }
    Failure::new(status)
}

/// Like [`collapse`], but an unknown pool maps to Not Found
fn collapse_lookup(status: Status, operation: &str, selector: &PoolSelector, err: &Error) -> Failure {
    let status = match err {
        Error::PoolNotFound { .. } => Status::NotFound,
        _ => status,
    };
    collapse(status, operation, &selector.to_string(), err)
}
