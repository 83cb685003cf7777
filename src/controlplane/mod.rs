//! Control Plane Module
//!
//! Pool and volume lifecycle orchestration for RADOS/RBD clusters, and the
//! HTTP API in front of it.

pub mod aggregation;
pub mod api;
pub mod backends;
pub mod orchestrator;
pub mod pool;
pub mod session;
pub mod status;
pub mod volume;

pub use aggregation::{AggregationService, PoolIoQuery, PoolQuery, PoolSummaryQuery, VolumeInfoQuery};
pub use api::{ApiServer, ApiServerConfig, RestRouter};
pub use backends::{BackendFactory, BackendKind, Backends};
pub use orchestrator::{Orchestrator, OrchestratorConfig, Outcome, VolumeLocks};
pub use pool::{PoolAdmin, PoolIoSummary, PoolSelector, PoolSummary};
pub use session::{ClusterSession, ImageGuard, PoolContextGuard};
pub use status::{Failure, Status};
pub use volume::{Volume, VolumeLifecycle, VolumeState};
