//! EBS Gateway - Block Storage Control Plane
//!
//! Exposes pool and volume administration for a RADOS/RBD cluster over a
//! small HTTP API, turning each request into a short workflow against the
//! cluster, the device mapper and the volume record store.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                HTTP API  (GET /?Action=...)                   │
//! ├───────────────────────────────────────────────────────────────┤
//! │                        Orchestrator                           │
//! │     status collapse · keyed locks · compensation              │
//! ├──────────────────┬───────────────────┬────────────────────────┤
//! │    PoolAdmin     │  VolumeLifecycle  │  AggregationService    │
//! ├──────────────────┴───────────────────┴────────────────────────┤
//! │              ClusterSession (scoped handles)                  │
//! ├───────────────────────────────────────────────────────────────┤
//! │  Cluster client  │  Device mapper    │  Volume store          │
//! │  (ceph CLI/mem)  │  (rbd/simulated)  │  (memory/file)         │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controlplane`]: orchestration, API and backend adapters
//! - [`config`]: service configuration
//! - [`domain`]: ports implemented by the backends
//! - [`exec`]: bounded external command execution
//! - [`error`]: error types and handling

pub mod config;
pub mod controlplane;
pub mod domain;
pub mod error;
pub mod exec;

// Re-export commonly used types
pub use config::ServiceConfig;

pub use controlplane::{
    ApiServer, ApiServerConfig, BackendFactory, BackendKind, Backends, Failure, Orchestrator,
    OrchestratorConfig, PoolSelector, RestRouter, Status, Volume, VolumeState,
};

pub use domain::ports::{
    ClusterClient, ClusterClientRef, DeviceMapper, DeviceMapperRef, VolumeRecord, VolumeStore,
    VolumeStoreRef,
};

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
