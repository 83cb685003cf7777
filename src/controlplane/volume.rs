//! Volume Lifecycle
//!
//! Per-volume workflow steps. A [`Volume`] moves forward through
//! `Unallocated -> Allocated -> Mapped -> Persisted` only when a step
//! succeeds; a failed step leaves it where it was, so callers can tell how
//! far a workflow progressed. Allocation completes as soon as the image
//! exists; the identifier follows once the image has been stat'ed.

use crate::controlplane::session::ClusterSession;
use crate::domain::ports::{ClusterClientRef, DeviceMapperRef, ImageSpec, VolumeRecord, VolumeStore};
use crate::error::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Object size of new images, as a power of two (4 MiB objects)
pub const IMAGE_ORDER: u32 = 22;

/// Layering feature bit
pub const FEATURE_LAYERING: u64 = 1;

/// Feature set of new images
pub const IMAGE_FEATURES: u64 = FEATURE_LAYERING;

// =============================================================================
// Volume State
// =============================================================================

/// How far a volume has progressed through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeState {
    /// No image exists yet
    Unallocated,
    /// Image exists on the cluster
    Allocated,
    /// Image is bound to a local block device
    Mapped,
    /// Volume record written
    Persisted,
    /// Image removed
    Removed,
}

impl VolumeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeState::Unallocated => "unallocated",
            VolumeState::Allocated => "allocated",
            VolumeState::Mapped => "mapped",
            VolumeState::Persisted => "persisted",
            VolumeState::Removed => "removed",
        }
    }
}

impl std::fmt::Display for VolumeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Volume
// =============================================================================

/// A block volume inside a pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    name: String,
    pool: String,
    size: u64,
    device_path: String,
    identifier: Option<String>,
    state: VolumeState,
}

impl Volume {
    /// A volume that does not exist yet
    pub fn new(name: impl Into<String>, pool: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            pool: pool.into(),
            size,
            device_path: String::new(),
            identifier: None,
            state: VolumeState::Unallocated,
        }
    }

    /// A volume whose image is expected to exist already
    pub fn existing(name: impl Into<String>, pool: impl Into<String>) -> Self {
        Self {
            state: VolumeState::Allocated,
            ..Self::new(name, pool, 0)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Device path; empty until mapped
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// `<pool-id>.<block-name-prefix>`, known once the image is allocated
    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub fn state(&self) -> VolumeState {
        self.state
    }

    fn expect_state(&self, allowed: &[VolumeState]) -> Result<()> {
        if allowed.contains(&self.state) {
            return Ok(());
        }

        let expected = allowed
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("|");
        Err(Error::InvalidVolumeState {
            volume: format!("{}/{}", self.pool, self.name),
            state: self.state.to_string(),
            expected,
        })
    }
}

/// Fully-qualified cluster identifier of an image
pub fn qualified_identifier(pool_id: i64, block_name_prefix: &str) -> String {
    format!("{}.{}", pool_id, block_name_prefix)
}

// =============================================================================
// Volume Lifecycle
// =============================================================================

/// Executes volume workflow steps against the cluster and device mapper
pub struct VolumeLifecycle {
    client: ClusterClientRef,
    mapper: DeviceMapperRef,
}

impl VolumeLifecycle {
    pub fn new(client: ClusterClientRef, mapper: DeviceMapperRef) -> Self {
        Self { client, mapper }
    }

    /// Allocate the image and learn its identifier
    pub async fn create(&self, volume: &mut Volume) -> Result<()> {
        volume.expect_state(&[VolumeState::Unallocated])?;

        let session = ClusterSession::open(self.client.as_ref(), &volume.pool).await?;
        let context = session.context()?;

        let spec = ImageSpec {
            name: volume.name.clone(),
            size: volume.size,
            order: IMAGE_ORDER,
            features: IMAGE_FEATURES,
        };
        context.create_image(&spec).await?;
        volume.state = VolumeState::Allocated;

        let image = context.open_image(&volume.name).await?;
        let info = image.stat().await?;

        volume.identifier = Some(qualified_identifier(context.pool_id(), &info.block_name_prefix));

        info!(
            "Volume allocated: {}/{} ({} bytes, id {})",
            volume.pool,
            volume.name,
            volume.size,
            volume.identifier.as_deref().unwrap_or_default()
        );
        Ok(())
    }

    /// Bind the image to a local block device
    pub async fn map(&self, volume: &mut Volume) -> Result<()> {
        volume.expect_state(&[VolumeState::Allocated])?;

        let device_path = self.mapper.map(&volume.pool, &volume.name).await?;

        volume.device_path = device_path;
        volume.state = VolumeState::Mapped;

        info!(
            "Volume mapped: {}/{} -> {}",
            volume.pool, volume.name, volume.device_path
        );
        Ok(())
    }

    /// Release the local block device
    pub async fn unmap(&self, volume: &mut Volume) -> Result<()> {
        volume.expect_state(&[VolumeState::Mapped, VolumeState::Persisted])?;

        self.mapper.unmap(&volume.pool, &volume.name).await?;

        volume.device_path.clear();
        volume.state = VolumeState::Allocated;

        info!("Volume unmapped: {}/{}", volume.pool, volume.name);
        Ok(())
    }

    /// Resize the image in place
    pub async fn resize(&self, volume: &mut Volume, new_size: u64) -> Result<()> {
        volume.expect_state(&[
            VolumeState::Allocated,
            VolumeState::Mapped,
            VolumeState::Persisted,
        ])?;

        let session = ClusterSession::open(self.client.as_ref(), &volume.pool).await?;
        let image = session.context()?.open_image(&volume.name).await?;
        image
            .resize(new_size)
            .await
            .map_err(|e| Error::ResizeFailed {
                volume: format!("{}/{}", volume.pool, volume.name),
                size: new_size,
                source: Box::new(e),
            })?;

        debug!(
            "Volume resized: {}/{} {} -> {} bytes",
            volume.pool, volume.name, volume.size, new_size
        );
        volume.size = new_size;
        Ok(())
    }

    /// Remove the image. Mapping state is not checked.
    pub async fn remove(&self, volume: &mut Volume) -> Result<()> {
        volume.expect_state(&[
            VolumeState::Allocated,
            VolumeState::Mapped,
            VolumeState::Persisted,
        ])?;

        let session = ClusterSession::open(self.client.as_ref(), &volume.pool).await?;
        session.context()?.remove_image(&volume.name).await?;

        volume.state = VolumeState::Removed;

        info!("Volume removed: {}/{}", volume.pool, volume.name);
        Ok(())
    }

    /// Write the volume record after create and map have both succeeded
    pub async fn persist_create_result(
        &self,
        volume: &mut Volume,
        store: &dyn VolumeStore,
    ) -> Result<()> {
        volume.expect_state(&[VolumeState::Mapped])?;

        let identifier = volume.identifier.clone().ok_or_else(|| {
            Error::Internal(format!("volume {}/{} has no identifier", volume.pool, volume.name))
        })?;

        let now = Utc::now();
        store
            .insert(VolumeRecord {
                pool: volume.pool.clone(),
                name: volume.name.clone(),
                size: volume.size,
                device_path: volume.device_path.clone(),
                identifier,
                created_at: now,
                updated_at: now,
            })
            .await?;

        volume.state = VolumeState::Persisted;
        debug!("Volume record persisted: {}/{}", volume.pool, volume.name);
        Ok(())
    }
}
