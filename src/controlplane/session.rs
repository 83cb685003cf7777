//! Cluster Session
//!
//! Scoped ownership of a cluster connection and its per-pool I/O context.
//! Every handle acquired here is released when its owner drops, on success,
//! on error and on early return alike. Release order is always image, then
//! context, then connection.

use crate::domain::ports::{ClusterClient, ClusterConnection, Image, PoolContext};
use crate::error::{Error, Result};
use std::ops::Deref;
use tracing::debug;

// =============================================================================
// Pool Context Guard
// =============================================================================

/// A per-pool I/O context destroyed when the guard drops
pub struct PoolContextGuard {
    inner: Box<dyn PoolContext>,
}

impl PoolContextGuard {
    fn new(inner: Box<dyn PoolContext>) -> Self {
        Self { inner }
    }

    /// Open an image in this pool
    pub async fn open_image(&self, name: &str) -> Result<ImageGuard> {
        let image = self.inner.open_image(name).await?;
        Ok(ImageGuard { inner: image })
    }
}

impl Deref for PoolContextGuard {
    type Target = dyn PoolContext;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl Drop for PoolContextGuard {
    fn drop(&mut self) {
        debug!("Releasing I/O context for pool {}", self.inner.pool_name());
        self.inner.destroy();
    }
}

// =============================================================================
// Image Guard
// =============================================================================

/// An open image closed when the guard drops
pub struct ImageGuard {
    inner: Box<dyn Image>,
}

impl Deref for ImageGuard {
    type Target = dyn Image;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl Drop for ImageGuard {
    fn drop(&mut self) {
        self.inner.close();
    }
}

// =============================================================================
// Cluster Session
// =============================================================================

/// Exclusive owner of one connection and at most one pool context
pub struct ClusterSession {
    connection: Option<Box<dyn ClusterConnection>>,
    context: Option<PoolContextGuard>,
}

impl ClusterSession {
    /// Connect without opening a pool context
    pub async fn open_cluster(client: &dyn ClusterClient) -> Result<Self> {
        let connection = client.connect().await?;
        debug!("Cluster session opened ({})", client.backend_name());

        Ok(Self {
            connection: Some(connection),
            context: None,
        })
    }

    /// Connect and open an I/O context scoped to `pool`
    pub async fn open(client: &dyn ClusterClient, pool: &str) -> Result<Self> {
        // On failure `session` drops here and shuts the connection down
        let mut session = Self::open_cluster(client).await?;
        let context = session.open_pool(pool).await?;
        session.context = Some(context);
        Ok(session)
    }

    /// The live connection
    pub fn connection(&self) -> Result<&dyn ClusterConnection> {
        self.connection
            .as_deref()
            .ok_or_else(|| Error::Internal("cluster session already closed".into()))
    }

    /// The pool context opened by [`ClusterSession::open`]
    pub fn context(&self) -> Result<&PoolContextGuard> {
        self.context
            .as_ref()
            .ok_or_else(|| Error::Internal("cluster session has no pool context".into()))
    }

    /// Open an additional scoped context on this connection
    pub async fn open_pool(&self, pool: &str) -> Result<PoolContextGuard> {
        let context = self.connection()?.open_pool(pool).await?;
        Ok(PoolContextGuard::new(context))
    }

    /// Whether the connection is still held
    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    /// Release the context, then the connection. Safe to call repeatedly.
    pub fn close(&mut self) {
        drop(self.context.take());

        if let Some(mut connection) = self.connection.take() {
            connection.shutdown();
            debug!("Cluster session closed");
        }
    }
}

impl Drop for ClusterSession {
    fn drop(&mut self) {
        self.close();
    }
}
