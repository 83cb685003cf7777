//! Pool Administration
//!
//! Pool-level operations: create, delete, resolve, statistics and replica
//! factor changes. Summaries are derived from the cluster's raw statistics on
//! every call; nothing here is cached.

use crate::controlplane::session::ClusterSession;
use crate::domain::ports::{ClusterClientRef, MonCommand, MonCommandOutput, PoolStat};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Token selecting every pool in the cluster
pub const WILDCARD: &str = "*";

// =============================================================================
// Pool Selection
// =============================================================================

/// One named pool or every pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolSelector {
    All,
    Named(String),
}

impl PoolSelector {
    /// Parse a `PoolName` parameter; the wildcard token selects every pool
    pub fn parse(name: &str) -> Self {
        if name == WILDCARD {
            PoolSelector::All
        } else {
            PoolSelector::Named(name.to_string())
        }
    }
}

impl std::fmt::Display for PoolSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolSelector::All => write!(f, "{}", WILDCARD),
            PoolSelector::Named(name) => write!(f, "{}", name),
        }
    }
}

// =============================================================================
// Summaries
// =============================================================================

/// Capacity summary of a pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSummary {
    #[serde(rename = "Replica_num")]
    pub replica_num: u64,
    #[serde(rename = "Objects_num")]
    pub objects_num: u64,
    #[serde(rename = "Used_bytes")]
    pub used_bytes: u64,
}

impl PoolSummary {
    /// Derive the summary; an empty pool reports a replica count of zero
    pub fn from_stat(stat: &PoolStat) -> Self {
        let replica_num = stat
            .num_object_copies
            .checked_div(stat.num_objects)
            .unwrap_or(0);

        Self {
            replica_num,
            objects_num: stat.num_objects,
            used_bytes: stat.num_bytes,
        }
    }
}

/// I/O counters of a pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolIoSummary {
    #[serde(rename = "IO_read")]
    pub io_read: u64,
    #[serde(rename = "IO_write")]
    pub io_write: u64,
    #[serde(rename = "IO_read_kb")]
    pub io_read_kb: u64,
    #[serde(rename = "IO_write_kb")]
    pub io_write_kb: u64,
}

impl PoolIoSummary {
    pub fn from_stat(stat: &PoolStat) -> Self {
        Self {
            io_read: stat.num_rd,
            io_write: stat.num_wr,
            io_read_kb: stat.num_rd_kb,
            io_write_kb: stat.num_wr_kb,
        }
    }
}

// =============================================================================
// Pool Admin
// =============================================================================

/// Pool-level cluster operations
pub struct PoolAdmin {
    client: ClusterClientRef,
}

impl PoolAdmin {
    pub fn new(client: ClusterClientRef) -> Self {
        Self { client }
    }

    /// Create a pool
    pub async fn create(&self, name: &str) -> Result<()> {
        validate_name(name)?;

        let session = ClusterSession::open_cluster(self.client.as_ref()).await?;
        session.connection()?.make_pool(name).await?;

        info!("Pool created: {}", name);
        Ok(())
    }

    /// Delete a pool
    pub async fn delete(&self, name: &str) -> Result<()> {
        validate_name(name)?;

        let session = ClusterSession::open_cluster(self.client.as_ref()).await?;
        session.connection()?.delete_pool(name).await?;

        info!("Pool deleted: {}", name);
        Ok(())
    }

    /// Resolve a selector to pool names, in cluster order
    pub async fn resolve(
        &self,
        session: &ClusterSession,
        selector: &PoolSelector,
    ) -> Result<Vec<String>> {
        let connection = session.connection()?;

        match selector {
            PoolSelector::All => {
                let pools = connection.list_pools().await?;
                debug!("Resolved wildcard to {} pools", pools.len());
                Ok(pools)
            }
            PoolSelector::Named(name) => {
                connection.lookup_pool(name).await.map_err(|e| match e {
                    Error::PoolNotFound { .. } => e,
                    other => {
                        debug!("Pool lookup for {} failed: {}", name, other);
                        Error::PoolNotFound { pool: name.clone() }
                    }
                })?;
                Ok(vec![name.clone()])
            }
        }
    }

    /// Fetch and summarize the statistics of one pool
    pub async fn stats(&self, pool: &str) -> Result<PoolSummary> {
        let session = ClusterSession::open(self.client.as_ref(), pool).await?;
        let stat = session.context()?.pool_stats().await?;
        Ok(PoolSummary::from_stat(&stat))
    }

    /// Set the replica count of a pool
    pub async fn set_replica_factor(&self, pool: &str, size: u32) -> Result<MonCommandOutput> {
        validate_name(pool)?;

        let command = MonCommand::pool_set(pool, "size", size);
        debug!(
            "Submitting monitor command: {}",
            String::from_utf8_lossy(&command.to_json()?)
        );

        let session = ClusterSession::open_cluster(self.client.as_ref()).await?;
        let output = session.connection()?.mon_command(&command).await?;

        info!("Pool {} replica size set to {}: {}", pool, size, output.status);
        Ok(output)
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::ApiValidation("pool name must not be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::backends::memory::{FaultPoint, MemoryCluster};
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn admin(cluster: &MemoryCluster) -> PoolAdmin {
        PoolAdmin::new(Arc::new(cluster.clone()))
    }

    #[test]
    fn test_selector_parse() {
        assert_eq!(PoolSelector::parse("*"), PoolSelector::All);
        assert_eq!(PoolSelector::parse("rbd"), PoolSelector::Named("rbd".into()));
    }

    #[test]
    fn test_replica_empty_pool() {
        let summary = PoolSummary::from_stat(&PoolStat::default());
        assert_eq!(summary.replica_num, 0);
        assert_eq!(summary.objects_num, 0);
    }

    #[test]
    fn test_replica_factor_exact() {
        for (replicas, objects) in [(1u64, 1u64), (2, 7), (3, 1000)] {
            let stat = PoolStat {
                num_objects: objects,
                num_object_copies: replicas * objects,
                num_bytes: 4096,
                ..Default::default()
            };
            let summary = PoolSummary::from_stat(&stat);
            assert_eq!(summary.replica_num, replicas);
            assert_eq!(summary.used_bytes, 4096);
        }
    }

    #[test]
    fn test_summary_wire_names() {
        let json = serde_json::to_value(PoolIoSummary {
            io_read: 1,
            io_write: 2,
            io_read_kb: 3,
            io_write_kb: 4,
        })
        .unwrap();
        assert_eq!(json["IO_read"], 1);
        assert_eq!(json["IO_write_kb"], 4);
    }

    #[tokio::test]
    async fn test_create_and_delete() {
        let cluster = MemoryCluster::new();
        let admin = admin(&cluster);

        admin.create("rbd").await.unwrap();
        assert_eq!(cluster.pool_names(), vec!["rbd"]);

        admin.delete("rbd").await.unwrap();
        let err = admin.delete("rbd").await.unwrap_err();
        assert!(err.cluster_reason().is_some());
        assert_eq!(cluster.handles().connections, 0);
    }

    #[tokio::test]
    async fn test_create_duplicate_keeps_existing_pool() {
        let cluster = MemoryCluster::with_pools(&["rbd"]);
        cluster.seed_image("rbd", "vol1", 1024);
        let admin = admin(&cluster);

        let err = admin.create("rbd").await.unwrap_err();
        assert_eq!(err.cluster_reason(), Some("rados: ret=-17, File exists"));
        assert_eq!(cluster.image_size("rbd", "vol1"), Some(1024));
    }

    #[tokio::test]
    async fn test_create_empty_name() {
        let cluster = MemoryCluster::new();
        assert_matches!(admin(&cluster).create("").await, Err(Error::ApiValidation(_)));
        assert_eq!(cluster.handles().peak_contexts, 0);
    }

    #[tokio::test]
    async fn test_resolve() {
        let cluster = MemoryCluster::with_pools(&["rbd", "ssd", "hdd"]);
        let admin = admin(&cluster);
        let session = ClusterSession::open_cluster(&cluster).await.unwrap();

        let all = admin.resolve(&session, &PoolSelector::All).await.unwrap();
        assert_eq!(all, vec!["rbd", "ssd", "hdd"]);

        let one = admin
            .resolve(&session, &PoolSelector::Named("ssd".into()))
            .await
            .unwrap();
        assert_eq!(one, vec!["ssd"]);

        let missing = admin
            .resolve(&session, &PoolSelector::Named("nvme".into()))
            .await;
        assert_matches!(missing, Err(Error::PoolNotFound { ref pool }) if pool == "nvme");
    }

    #[tokio::test]
    async fn test_stats() {
        let cluster = MemoryCluster::with_pools(&["rbd"]);
        cluster.set_pool_stats(
            "rbd",
            PoolStat {
                num_objects: 10,
                num_object_copies: 30,
                num_bytes: 1 << 20,
                ..Default::default()
            },
        );

        let summary = admin(&cluster).stats("rbd").await.unwrap();
        assert_eq!(
            summary,
            PoolSummary {
                replica_num: 3,
                objects_num: 10,
                used_bytes: 1 << 20
            }
        );
        assert_eq!(cluster.handles().contexts, 0);
    }

    #[tokio::test]
    async fn test_set_replica_factor() {
        let cluster = MemoryCluster::with_pools(&["rbd"]);
        let admin = admin(&cluster);

        admin.set_replica_factor("rbd", 2).await.unwrap();
        assert_eq!(cluster.pool_size("rbd"), Some(2));

        cluster.inject_fault(FaultPoint::MonCommand, Some("rbd"), "(1) Operation not permitted");
        let err = admin.set_replica_factor("rbd", 3).await.unwrap_err();
        assert_eq!(err.cluster_reason(), Some("(1) Operation not permitted"));
        assert_eq!(cluster.pool_size("rbd"), Some(2));
    }
}
