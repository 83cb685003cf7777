//! Domain Ports - Core trait definitions for the EBS gateway
//!
//! These traits define the boundaries between the orchestration layer and the
//! external collaborators it drives: the storage cluster client, the device
//! mapping executable and the volume record store. Adapters in
//! [`crate::controlplane::backends`] implement them.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Pool Statistics
// =============================================================================

/// Raw pool statistics as reported by the cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStat {
    /// Space used in bytes
    pub num_bytes: u64,
    /// Space used in KB
    pub num_kb: u64,
    /// Number of objects in the pool
    pub num_objects: u64,
    /// Number of clones of objects
    pub num_object_clones: u64,
    /// Number of object copies (objects * replicas)
    pub num_object_copies: u64,
    /// Objects missing on the primary OSD
    pub num_objects_missing_on_primary: u64,
    /// Objects found nowhere
    pub num_objects_unfound: u64,
    /// Objects replicated fewer times than they should be
    pub num_objects_degraded: u64,
    /// Read operations
    pub num_rd: u64,
    /// KB read
    pub num_rd_kb: u64,
    /// Write operations
    pub num_wr: u64,
    /// KB written
    pub num_wr_kb: u64,
}

// =============================================================================
// Image Types
// =============================================================================

/// Image metadata returned by a stat call
///
/// Field names on the wire match what existing clients of the gateway parse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    #[serde(rename = "Size")]
    pub size: u64,
    #[serde(rename = "Obj_size")]
    pub obj_size: u64,
    #[serde(rename = "Num_objs")]
    pub num_objs: u64,
    #[serde(rename = "Order")]
    pub order: u32,
    #[serde(rename = "Block_name_prefix")]
    pub block_name_prefix: String,
    #[serde(rename = "Parent_pool")]
    pub parent_pool: i64,
    #[serde(rename = "Parent_name")]
    pub parent_name: String,
}

/// Parameters for allocating a new image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpec {
    /// Image name inside the pool
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Object size as a power of two
    pub order: u32,
    /// Feature bitmask
    pub features: u64,
}

// =============================================================================
// Monitor Commands
// =============================================================================

/// Administrative command submitted to the cluster monitors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonCommand {
    pub prefix: String,
    pub pool: String,
    pub var: String,
    pub val: String,
}

impl MonCommand {
    /// `osd pool set <pool> <var> <val>`
    pub fn pool_set(pool: &str, var: &str, val: impl ToString) -> Self {
        Self {
            prefix: "osd pool set".to_string(),
            pool: pool.to_string(),
            var: var.to_string(),
            val: val.to_string(),
        }
    }

    /// Encode the command the way the monitor protocol expects it
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Output of a monitor command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonCommandOutput {
    /// Command payload
    pub content: String,
    /// Human-readable status line
    pub status: String,
}

// =============================================================================
// Volume Records
// =============================================================================

/// Durable record of a created volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRecord {
    pub pool: String,
    pub name: String,
    pub size: u64,
    pub device_path: String,
    pub identifier: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Cluster Client Ports
// =============================================================================

/// Entry point to the storage cluster
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create a handle, load the cluster configuration and authenticate
    async fn connect(&self) -> Result<Box<dyn ClusterConnection>>;

    /// Get backend name
    fn backend_name(&self) -> &str;
}

/// An authenticated connection to the cluster
#[async_trait]
pub trait ClusterConnection: Send + Sync {
    /// Create a pool
    async fn make_pool(&self, name: &str) -> Result<()>;

    /// Delete a pool
    async fn delete_pool(&self, name: &str) -> Result<()>;

    /// List all pools, in cluster order
    async fn list_pools(&self) -> Result<Vec<String>>;

    /// Look up a pool by name, returning its id
    async fn lookup_pool(&self, name: &str) -> Result<i64>;

    /// Open an I/O context scoped to one pool
    async fn open_pool(&self, name: &str) -> Result<Box<dyn PoolContext>>;

    /// Submit an administrative command to the monitors
    async fn mon_command(&self, command: &MonCommand) -> Result<MonCommandOutput>;

    /// Release the connection
    fn shutdown(&mut self);
}

/// An I/O context bound to a single pool
#[async_trait]
pub trait PoolContext: Send + Sync {
    /// Name of the pool this context is bound to
    fn pool_name(&self) -> &str;

    /// Cluster-assigned pool id
    fn pool_id(&self) -> i64;

    /// Fetch pool statistics
    async fn pool_stats(&self) -> Result<PoolStat>;

    /// Allocate a new image
    async fn create_image(&self, spec: &ImageSpec) -> Result<()>;

    /// List image names in the pool
    async fn list_images(&self) -> Result<Vec<String>>;

    /// Open an existing image
    async fn open_image(&self, name: &str) -> Result<Box<dyn Image>>;

    /// Remove an image by name
    async fn remove_image(&self, name: &str) -> Result<()>;

    /// Release the context
    fn destroy(&mut self);
}

/// An open image handle
#[async_trait]
pub trait Image: Send + Sync {
    /// Image name
    fn name(&self) -> &str;

    /// Fetch image metadata
    async fn stat(&self) -> Result<ImageInfo>;

    /// Resize the image in place
    async fn resize(&self, size: u64) -> Result<()>;

    /// Close the handle
    fn close(&mut self);
}

// =============================================================================
// Device Mapper Port
// =============================================================================

/// Binds images to local block devices via an out-of-process command
#[async_trait]
pub trait DeviceMapper: Send + Sync {
    /// Map an image, returning the device path
    async fn map(&self, pool: &str, volume: &str) -> Result<String>;

    /// Unmap an image
    async fn unmap(&self, pool: &str, volume: &str) -> Result<()>;
}

// =============================================================================
// Volume Store Port
// =============================================================================

/// Persistence collaborator for volume records
#[async_trait]
pub trait VolumeStore: Send + Sync {
    /// Insert a record; fails if one already exists for (pool, name)
    async fn insert(&self, record: VolumeRecord) -> Result<()>;

    /// Get a record
    async fn get(&self, pool: &str, name: &str) -> Result<Option<VolumeRecord>>;

    /// List all records
    async fn list(&self) -> Result<Vec<VolumeRecord>>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ClusterClientRef = Arc<dyn ClusterClient>;
pub type DeviceMapperRef = Arc<dyn DeviceMapper>;
pub type VolumeStoreRef = Arc<dyn VolumeStore>;
