//! Backend Adapters
//!
//! Implementations of the domain ports:
//! - Ceph CLI: real cluster through the `ceph`, `rados` and `rbd` tools
//! - Memory: simulated cluster and device mapper for standalone mode
//! - RBD: device mapping through the rbd executable
//! - Store: volume record persistence

pub mod ceph;
pub mod memory;
pub mod rbd;
pub mod store;

pub use ceph::{CephCliCluster, CephConfig};
pub use memory::{FaultPoint, HandleCounts, MemoryCluster, SimulatedDeviceMapper};
pub use rbd::{DeviceConfig, RbdDeviceMapper};
pub use store::{FileVolumeStore, MemoryVolumeStore};

use crate::config::ServiceConfig;
use crate::domain::ports::{ClusterClientRef, DeviceMapperRef, VolumeStoreRef};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Which cluster the gateway drives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process simulated cluster
    #[default]
    Standalone,
    /// Real cluster via the Ceph CLI tools
    Ceph,
}

/// Where volume records go
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    File,
}

/// Volume record store settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    /// JSON-lines file, required for the file store
    pub path: Option<PathBuf>,
}

/// The collaborators handed to the orchestrator
#[derive(Clone)]
pub struct Backends {
    pub client: ClusterClientRef,
    pub mapper: DeviceMapperRef,
    pub store: VolumeStoreRef,
}

/// Factory for creating backend adapters
pub struct BackendFactory;

impl BackendFactory {
    /// Build the cluster client, device mapper and store selected by `config`
    pub async fn create(config: &ServiceConfig) -> Result<Backends> {
        let (client, mapper): (ClusterClientRef, DeviceMapperRef) = match config.backend {
            BackendKind::Standalone => {
                let pools: Vec<&str> = config.standalone.pools.iter().map(String::as_str).collect();
                let cluster = MemoryCluster::with_pools(&pools);
                let mapper = SimulatedDeviceMapper::new(cluster.clone())
                    .with_timeout(config.device.map_timeout);
                info!("Using simulated cluster with pools {:?}", pools);
                (Arc::new(cluster), Arc::new(mapper))
            }
            BackendKind::Ceph => {
                info!(
                    "Using Ceph cluster (conf {})",
                    config.ceph.conf_path.as_deref().unwrap_or("default")
                );
                (
                    Arc::new(CephCliCluster::new(config.ceph.clone())),
                    Arc::new(RbdDeviceMapper::new(config.device.clone())),
                )
            }
        };

        let store: VolumeStoreRef = match config.store.kind {
            StoreKind::Memory => Arc::new(MemoryVolumeStore::new()),
            StoreKind::File => {
                let path = config.store.path.clone().ok_or_else(|| {
                    Error::Configuration("store.path is required for a file store".into())
                })?;
                Arc::new(FileVolumeStore::open(path).await?)
            }
        };

        Ok(Backends {
            client,
            mapper,
            store,
        })
    }
}
