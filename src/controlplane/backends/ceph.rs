//! Ceph CLI Cluster Adapter
//!
//! Drives a real RADOS/RBD cluster through the `ceph`, `rados` and `rbd`
//! command-line tools, parsing their JSON output. Every invocation is bounded
//! by the configured command timeout and killed if it overstays.
//!
//! The tools have no persistent session, so a "connection" is a verified
//! reachability check plus the shared invocation settings.

use crate::domain::ports::{
    ClusterClient, ClusterConnection, Image, ImageInfo, ImageSpec, MonCommand, MonCommandOutput,
    PoolContext, PoolStat,
};
use crate::error::{Error, Result, SessionStage};
use crate::exec::{BoundedCommand, CommandOutput, DEFAULT_COMMAND_TIMEOUT};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the Ceph CLI adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CephConfig {
    /// `ceph` executable
    pub ceph_binary: String,
    /// `rados` executable
    pub rados_binary: String,
    /// `rbd` executable
    pub rbd_binary: String,
    /// Cluster configuration file; tool default when unset
    pub conf_path: Option<String>,
    /// Client id used to authenticate (`client.<id>`)
    pub client_id: Option<String>,
    /// Placement group count for new pools
    pub pg_num: u32,
    /// Bound on every CLI invocation
    #[serde(with = "crate::config::duration_secs")]
    pub command_timeout: Duration,
}

impl Default for CephConfig {
    fn default() -> Self {
        Self {
            ceph_binary: "ceph".to_string(),
            rados_binary: "rados".to_string(),
            rbd_binary: "rbd".to_string(),
            conf_path: None,
            client_id: None,
            pg_num: 64,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Tool {
    Ceph,
    Rados,
    Rbd,
}

impl CephConfig {
    fn command(&self, tool: Tool) -> BoundedCommand {
        let binary = match tool {
            Tool::Ceph => &self.ceph_binary,
            Tool::Rados => &self.rados_binary,
            Tool::Rbd => &self.rbd_binary,
        };

        let mut command = BoundedCommand::new(binary).timeout(self.command_timeout);
        if let Some(conf) = &self.conf_path {
            command = command.args(["--conf", conf.as_str()]);
        }
        if let Some(id) = &self.client_id {
            command = command.args(["--id", id.as_str()]);
        }
        command
    }
}

/// Run a cluster command, turning a failed exit into a cluster error that
/// carries the tool's diagnostic
async fn run(operation: &str, target: &str, command: BoundedCommand) -> Result<CommandOutput> {
    command.run().await.map_err(|e| match e {
        Error::CommandFailed { reason, .. } => Error::cluster(operation, target, reason),
        other => other,
    })
}

// =============================================================================
// JSON Output Shapes
// =============================================================================

#[derive(Debug, Deserialize)]
struct PoolDetail {
    pool_id: i64,
    pool_name: String,
}

#[derive(Debug, Deserialize)]
struct DfReport {
    pools: Vec<DfPool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DfPool {
    name: String,
    size_bytes: u64,
    size_kb: u64,
    num_objects: u64,
    num_object_clones: u64,
    num_object_copies: u64,
    num_objects_missing_on_primary: u64,
    num_objects_unfound: u64,
    num_objects_degraded: u64,
    read_ops: u64,
    read_bytes: u64,
    write_ops: u64,
    write_bytes: u64,
}

impl From<DfPool> for PoolStat {
    fn from(df: DfPool) -> Self {
        PoolStat {
            num_bytes: df.size_bytes,
            num_kb: df.size_kb,
            num_objects: df.num_objects,
            num_object_clones: df.num_object_clones,
            num_object_copies: df.num_object_copies,
            num_objects_missing_on_primary: df.num_objects_missing_on_primary,
            num_objects_unfound: df.num_objects_unfound,
            num_objects_degraded: df.num_objects_degraded,
            num_rd: df.read_ops,
            num_rd_kb: df.read_bytes / 1024,
            num_wr: df.write_ops,
            num_wr_kb: df.write_bytes / 1024,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RbdInfo {
    size: u64,
    objects: u64,
    order: u32,
    object_size: u64,
    block_name_prefix: String,
    #[serde(default)]
    parent: Option<RbdParent>,
}

#[derive(Debug, Deserialize)]
struct RbdParent {
    #[serde(default)]
    pool_id: Option<i64>,
    #[serde(default)]
    image: String,
}

impl From<RbdInfo> for ImageInfo {
    fn from(info: RbdInfo) -> Self {
        let (parent_pool, parent_name) = match info.parent {
            Some(parent) => (parent.pool_id.unwrap_or(-1), parent.image),
            None => (-1, String::new()),
        };

        ImageInfo {
            size: info.size,
            obj_size: info.object_size,
            num_objs: info.objects,
            order: info.order,
            block_name_prefix: info.block_name_prefix,
            parent_pool,
            parent_name,
        }
    }
}

fn parse_pool_id(stdout: &str, name: &str) -> Result<i64> {
    let pools: Vec<PoolDetail> = serde_json::from_str(stdout)?;
    pools
        .into_iter()
        .find(|p| p.pool_name == name)
        .map(|p| p.pool_id)
        .ok_or_else(|| Error::PoolNotFound {
            pool: name.to_string(),
        })
}

fn parse_pool_stat(stdout: &str, name: &str) -> Result<PoolStat> {
    let report: DfReport = serde_json::from_str(stdout)?;
    report
        .pools
        .into_iter()
        .find(|p| p.name == name)
        .map(PoolStat::from)
        .ok_or_else(|| Error::PoolNotFound {
            pool: name.to_string(),
        })
}

/// Names of the image features set in `mask`
fn feature_names(mask: u64) -> Vec<&'static str> {
    const FEATURES: [(u64, &str); 6] = [
        (1, "layering"),
        (2, "striping"),
        (4, "exclusive-lock"),
        (8, "object-map"),
        (16, "fast-diff"),
        (32, "deep-flatten"),
    ];

    FEATURES
        .iter()
        .filter(|(bit, _)| mask & bit != 0)
        .map(|(_, name)| *name)
        .collect()
}

fn is_not_found(reason: &str) -> bool {
    reason.contains("No such file or directory") || reason.contains("ENOENT")
}

// =============================================================================
// Cluster Client
// =============================================================================

/// Cluster client backed by the Ceph command-line tools
pub struct CephCliCluster {
    config: Arc<CephConfig>,
}

impl CephCliCluster {
    pub fn new(config: CephConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl ClusterClient for CephCliCluster {
    async fn connect(&self) -> Result<Box<dyn ClusterConnection>> {
        if let Some(conf) = &self.config.conf_path {
            if !Path::new(conf).exists() {
                return Err(Error::session(
                    SessionStage::ReadConfig,
                    format!("{}: No such file or directory", conf),
                ));
            }
        }

        let output = self
            .config
            .command(Tool::Ceph)
            .args(["fsid", "-f", "json"])
            .run()
            .await
            .map_err(|e| Error::session(SessionStage::Connect, e.to_string()))?;
        debug!("Connected to cluster {}", output.stdout.trim());

        Ok(Box::new(CephConnection {
            config: self.config.clone(),
        }))
    }

    fn backend_name(&self) -> &str {
        "ceph"
    }
}

// =============================================================================
// Connection
// =============================================================================

struct CephConnection {
    config: Arc<CephConfig>,
}

impl CephConnection {
    async fn pool_id(&self, name: &str) -> Result<i64> {
        let command = self
            .config
            .command(Tool::Ceph)
            .args(["osd", "pool", "ls", "detail", "-f", "json"]);
        let output = run("lookup_pool", name, command).await?;
        parse_pool_id(&output.stdout, name)
    }
}

#[async_trait]
impl ClusterConnection for CephConnection {
    async fn make_pool(&self, name: &str) -> Result<()> {
        let command = self.config.command(Tool::Ceph).args([
            "osd".to_string(),
            "pool".to_string(),
            "create".to_string(),
            name.to_string(),
            self.config.pg_num.to_string(),
        ]);
        run("make_pool", name, command).await?;
        info!("Pool created on cluster: {}", name);
        Ok(())
    }

    async fn delete_pool(&self, name: &str) -> Result<()> {
        let command = self.config.command(Tool::Ceph).args([
            "osd",
            "pool",
            "delete",
            name,
            name,
            "--yes-i-really-really-mean-it",
        ]);
        run("delete_pool", name, command).await?;
        info!("Pool deleted on cluster: {}", name);
        Ok(())
    }

    async fn list_pools(&self) -> Result<Vec<String>> {
        let command = self
            .config
            .command(Tool::Ceph)
            .args(["osd", "pool", "ls", "-f", "json"]);
        let output = run("list_pools", "cluster", command).await?;
        Ok(serde_json::from_str(&output.stdout)?)
    }

    async fn lookup_pool(&self, name: &str) -> Result<i64> {
        self.pool_id(name).await
    }

    async fn open_pool(&self, name: &str) -> Result<Box<dyn PoolContext>> {
        let pool_id = self
            .pool_id(name)
            .await
            .map_err(|e| Error::session(SessionStage::OpenContext, e.to_string()))?;

        Ok(Box::new(CephPoolContext {
            config: self.config.clone(),
            pool_name: name.to_string(),
            pool_id,
        }))
    }

    async fn mon_command(&self, command: &MonCommand) -> Result<MonCommandOutput> {
        let args = command
            .prefix
            .split_whitespace()
            .map(str::to_string)
            .chain([command.pool.clone(), command.var.clone(), command.val.clone()]);
        let output = run(
            "mon_command",
            &command.pool,
            self.config.command(Tool::Ceph).args(args),
        )
        .await?;

        // ceph prints the status line on stderr
        Ok(MonCommandOutput {
            content: output.stdout.trim().to_string(),
            status: output.stderr.trim().to_string(),
        })
    }

    fn shutdown(&mut self) {}
}

// =============================================================================
// Pool Context
// =============================================================================

struct CephPoolContext {
    config: Arc<CephConfig>,
    pool_name: String,
    pool_id: i64,
}

impl CephPoolContext {
    fn rbd(&self) -> BoundedCommand {
        self.config
            .command(Tool::Rbd)
            .args(["--pool", self.pool_name.as_str()])
    }

    fn target(&self, image: &str) -> String {
        format!("{}/{}", self.pool_name, image)
    }
}

#[async_trait]
impl PoolContext for CephPoolContext {
    fn pool_name(&self) -> &str {
        &self.pool_name
    }

    fn pool_id(&self) -> i64 {
        self.pool_id
    }

    async fn pool_stats(&self) -> Result<PoolStat> {
        let command = self.config.command(Tool::Rados).args(["df", "-f", "json"]);
        let output = run("pool_stats", &self.pool_name, command).await?;
        parse_pool_stat(&output.stdout, &self.pool_name)
    }

    async fn create_image(&self, spec: &ImageSpec) -> Result<()> {
        let mut command = self.rbd().args([
            "create".to_string(),
            "--size".to_string(),
            format!("{}B", spec.size),
            "--order".to_string(),
            spec.order.to_string(),
        ]);
        for feature in feature_names(spec.features) {
            command = command.args(["--image-feature", feature]);
        }
        run("create_image", &self.target(&spec.name), command.arg(&spec.name)).await?;
        Ok(())
    }

    async fn list_images(&self) -> Result<Vec<String>> {
        let command = self.rbd().args(["ls", "-f", "json"]);
        let output = run("list_images", &self.pool_name, command).await?;
        Ok(serde_json::from_str(&output.stdout)?)
    }

    async fn open_image(&self, name: &str) -> Result<Box<dyn Image>> {
        let image = CephImage {
            config: self.config.clone(),
            pool_name: self.pool_name.clone(),
            name: name.to_string(),
        };

        image.info().await.map_err(|e| match e {
            Error::Cluster { reason, .. } if is_not_found(&reason) => Error::ImageNotFound {
                pool: self.pool_name.clone(),
                image: name.to_string(),
                reason,
            },
            other => other,
        })?;

        Ok(Box::new(image))
    }

    async fn remove_image(&self, name: &str) -> Result<()> {
        let command = self.rbd().args(["rm", "--no-progress", name]);
        run("remove_image", &self.target(name), command).await?;
        Ok(())
    }

    fn destroy(&mut self) {}
}

// =============================================================================
// Image
// =============================================================================

struct CephImage {
    config: Arc<CephConfig>,
    pool_name: String,
    name: String,
}

impl CephImage {
    fn target(&self) -> String {
        format!("{}/{}", self.pool_name, self.name)
    }

    async fn info(&self) -> Result<ImageInfo> {
        let command = self.config.command(Tool::Rbd).args([
            "info",
            "--pool",
            self.pool_name.as_str(),
            self.name.as_str(),
            "-f",
            "json",
        ]);
        let output = run("stat_image", &self.target(), command).await?;
        let info: RbdInfo = serde_json::from_str(&output.stdout)?;
        Ok(info.into())
    }
}

#[async_trait]
impl Image for CephImage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stat(&self) -> Result<ImageInfo> {
        self.info().await
    }

    async fn resize(&self, size: u64) -> Result<()> {
        let command = self.config.command(Tool::Rbd).args([
            "resize".to_string(),
            "--pool".to_string(),
            self.pool_name.clone(),
            "--size".to_string(),
            format!("{}B", size),
            "--allow-shrink".to_string(),
            "--no-progress".to_string(),
            self.name.clone(),
        ]);
        run("resize_image", &self.target(), command).await?;
        Ok(())
    }

    fn close(&mut self) {}
}
