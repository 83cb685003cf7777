//! In-Memory Cluster Backend
//!
//! A simulated RADOS/RBD cluster for standalone mode and tests. Pools, images
//! and statistics are tracked internally; every connection, context and
//! image handle is counted so callers can assert nothing leaks. Faults can be
//! injected at any cluster call.

use crate::domain::ports::{
    ClusterClient, ClusterConnection, DeviceMapper, Image, ImageInfo, ImageSpec, MonCommand,
    MonCommandOutput, PoolContext, PoolStat,
};
use crate::error::{Error, Result, SessionStage};
use crate::exec::DEFAULT_COMMAND_TIMEOUT;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const ENOENT: &str = "ret=-2, No such file or directory";
const EEXIST: &str = "ret=-17, File exists";
const EINVAL: &str = "ret=-22, Invalid argument";

/// Replica count given to newly created pools
const DEFAULT_POOL_SIZE: u64 = 3;

// =============================================================================
// Fault Injection
// =============================================================================

/// Cluster call at which a fault can be injected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    Connect,
    MakePool,
    DeletePool,
    ListPools,
    OpenPool,
    PoolStats,
    CreateImage,
    ListImages,
    OpenImage,
    StatImage,
    ResizeImage,
    RemoveImage,
    MonCommand,
}

impl std::fmt::Display for FaultPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FaultPoint::Connect => "connect",
            FaultPoint::MakePool => "make_pool",
            FaultPoint::DeletePool => "delete_pool",
            FaultPoint::ListPools => "list_pools",
            FaultPoint::OpenPool => "open_pool",
            FaultPoint::PoolStats => "pool_stats",
            FaultPoint::CreateImage => "create_image",
            FaultPoint::ListImages => "list_images",
            FaultPoint::OpenImage => "open_image",
            FaultPoint::StatImage => "stat_image",
            FaultPoint::ResizeImage => "resize_image",
            FaultPoint::RemoveImage => "remove_image",
            FaultPoint::MonCommand => "mon_command",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone)]
struct Fault {
    point: FaultPoint,
    target: Option<String>,
    reason: String,
}

// =============================================================================
// Simulated State
// =============================================================================

#[derive(Debug, Clone)]
struct SimImage {
    size: u64,
    order: u32,
    block_name_prefix: String,
}

#[derive(Debug, Clone)]
struct SimPool {
    id: i64,
    name: String,
    size: u64,
    images: BTreeMap<String, SimImage>,
    stat_override: Option<PoolStat>,
    reads: u64,
    writes: u64,
}

impl SimPool {
    fn stats(&self) -> PoolStat {
        if let Some(stat) = &self.stat_override {
            return stat.clone();
        }

        // One header object per image; data objects are thin-provisioned
        let objects = self.images.len() as u64;
        PoolStat {
            num_objects: objects,
            num_object_copies: objects * self.size,
            num_rd: self.reads,
            num_wr: self.writes,
            ..Default::default()
        }
    }
}

/// Live handle counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandleCounts {
    pub connections: usize,
    pub contexts: usize,
    pub images: usize,
    /// Highest number of contexts open at the same time
    pub peak_contexts: usize,
}

#[derive(Debug, Default)]
struct ClusterState {
    pools: Vec<SimPool>,
    next_pool_id: i64,
    next_image_seq: u64,
    faults: Vec<Fault>,
    handles: HandleCounts,
}

impl ClusterState {
    fn check(&self, point: FaultPoint, target: &str) -> Result<()> {
        let fault = self.faults.iter().find(|f| {
            f.point == point && f.target.as_deref().map_or(true, |t| t == target)
        });

        match fault {
            Some(f) if point == FaultPoint::Connect => {
                Err(Error::session(SessionStage::Connect, f.reason.clone()))
            }
            Some(f) if point == FaultPoint::OpenPool => {
                Err(Error::session(SessionStage::OpenContext, f.reason.clone()))
            }
            Some(f) => Err(Error::cluster(point.to_string(), target, f.reason.clone())),
            None => Ok(()),
        }
    }

    fn pool(&self, name: &str) -> Option<&SimPool> {
        self.pools.iter().find(|p| p.name == name)
    }

    fn pool_mut(&mut self, name: &str) -> Option<&mut SimPool> {
        self.pools.iter_mut().find(|p| p.name == name)
    }

    fn add_pool(&mut self, name: &str) -> i64 {
        self.next_pool_id += 1;
        let id = self.next_pool_id;
        self.pools.push(SimPool {
            id,
            name: name.to_string(),
            size: DEFAULT_POOL_SIZE,
            images: BTreeMap::new(),
            stat_override: None,
            reads: 0,
            writes: 0,
        });
        id
    }

    fn add_image(&mut self, pool: &str, name: &str, size: u64, order: u32) -> Result<()> {
        self.next_image_seq += 1;
        let seq = self.next_image_seq;
        let target = format!("{}/{}", pool, name);

        let sim_pool = self
            .pool_mut(pool)
            .ok_or_else(|| Error::cluster("create_image", &target, format!("rbd: {}", ENOENT)))?;

        if sim_pool.images.contains_key(name) {
            return Err(Error::cluster("create_image", &target, format!("rbd: {}", EEXIST)));
        }

        let block_name_prefix = format!("rbd_data.{:x}{:08x}", sim_pool.id, 0x6b8b_4567 + seq);
        sim_pool.images.insert(
            name.to_string(),
            SimImage {
                size,
                order,
                block_name_prefix,
            },
        );
        sim_pool.writes += 1;
        Ok(())
    }
}

type SharedState = Arc<Mutex<ClusterState>>;

// =============================================================================
// Memory Cluster
// =============================================================================

/// Simulated cluster client
#[derive(Clone, Default)]
pub struct MemoryCluster {
    state: SharedState,
}

impl MemoryCluster {
    /// Create an empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cluster with the given pools, in order
    pub fn with_pools(pools: &[&str]) -> Self {
        let cluster = Self::new();
        {
            let mut state = cluster.state.lock();
            for pool in pools {
                state.add_pool(pool);
            }
        }
        cluster
    }

    /// Create an image directly, bypassing the client API
    pub fn seed_image(&self, pool: &str, name: &str, size: u64) {
        let mut state = self.state.lock();
        if state.pool(pool).is_none() {
            state.add_pool(pool);
        }
        if let Err(e) = state.add_image(pool, name, size, 22) {
            debug!("Seeding image {}/{} skipped: {}", pool, name, e);
        }
    }

    /// Replace the computed statistics of a pool
    pub fn set_pool_stats(&self, pool: &str, stat: PoolStat) {
        if let Some(p) = self.state.lock().pool_mut(pool) {
            p.stat_override = Some(stat);
        }
    }

    /// Make a cluster call fail. `target` narrows the fault to one pool or image.
    pub fn inject_fault(&self, point: FaultPoint, target: Option<&str>, reason: &str) {
        self.state.lock().faults.push(Fault {
            point,
            target: target.map(str::to_string),
            reason: reason.to_string(),
        });
    }

    /// Remove all injected faults
    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    /// Current handle counts
    pub fn handles(&self) -> HandleCounts {
        self.state.lock().handles
    }

    /// Pool names in cluster order
    pub fn pool_names(&self) -> Vec<String> {
        self.state.lock().pools.iter().map(|p| p.name.clone()).collect()
    }

    /// Replica size of a pool
    pub fn pool_size(&self, pool: &str) -> Option<u64> {
        self.state.lock().pool(pool).map(|p| p.size)
    }

    /// Size of an image, if it exists
    pub fn image_size(&self, pool: &str, image: &str) -> Option<u64> {
        self.state
            .lock()
            .pool(pool)
            .and_then(|p| p.images.get(image))
            .map(|i| i.size)
    }

    pub fn image_exists(&self, pool: &str, image: &str) -> bool {
        self.image_size(pool, image).is_some()
    }
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn connect(&self) -> Result<Box<dyn ClusterConnection>> {
        let mut state = self.state.lock();
        state.check(FaultPoint::Connect, "cluster")?;
        state.handles.connections += 1;

        Ok(Box::new(MemoryConnection {
            state: self.state.clone(),
            open: true,
        }))
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}

// =============================================================================
// Connection
// =============================================================================

struct MemoryConnection {
    state: SharedState,
    open: bool,
}

#[async_trait]
impl ClusterConnection for MemoryConnection {
    async fn make_pool(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.check(FaultPoint::MakePool, name)?;

        if state.pool(name).is_some() {
            return Err(Error::cluster("make_pool", name, format!("rados: {}", EEXIST)));
        }

        let id = state.add_pool(name);
        info!("Simulated pool created: {} (id {})", name, id);
        Ok(())
    }

    async fn delete_pool(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.check(FaultPoint::DeletePool, name)?;

        let before = state.pools.len();
        state.pools.retain(|p| p.name != name);
        if state.pools.len() == before {
            return Err(Error::cluster("delete_pool", name, format!("rados: {}", ENOENT)));
        }
        Ok(())
    }

    async fn list_pools(&self) -> Result<Vec<String>> {
        let state = self.state.lock();
        state.check(FaultPoint::ListPools, "cluster")?;
        Ok(state.pools.iter().map(|p| p.name.clone()).collect())
    }

    async fn lookup_pool(&self, name: &str) -> Result<i64> {
        let state = self.state.lock();
        state
            .pool(name)
            .map(|p| p.id)
            .ok_or_else(|| Error::PoolNotFound { pool: name.to_string() })
    }

    async fn open_pool(&self, name: &str) -> Result<Box<dyn PoolContext>> {
        let mut state = self.state.lock();
        state.check(FaultPoint::OpenPool, name)?;

        let pool_id = state
            .pool(name)
            .map(|p| p.id)
            .ok_or_else(|| Error::session(SessionStage::OpenContext, format!("rados: {}", ENOENT)))?;

        state.handles.contexts += 1;
        state.handles.peak_contexts = state.handles.peak_contexts.max(state.handles.contexts);

        Ok(Box::new(MemoryPoolContext {
            state: self.state.clone(),
            pool_name: name.to_string(),
            pool_id,
            open: true,
        }))
    }

    async fn mon_command(&self, command: &MonCommand) -> Result<MonCommandOutput> {
        let mut state = self.state.lock();
        state.check(FaultPoint::MonCommand, &command.pool)?;

        if command.prefix != "osd pool set" || command.var != "size" {
            return Err(Error::cluster("mon_command", &command.prefix, EINVAL));
        }

        let size: u64 = match command.val.parse() {
            Ok(n) if (1..=10).contains(&n) => n,
            _ => {
                return Err(Error::cluster(
                    "mon_command",
                    &command.pool,
                    format!("pool size must be between 1 and 10 ({})", EINVAL),
                ))
            }
        };

        let pool = state.pool_mut(&command.pool).ok_or_else(|| {
            Error::cluster(
                "mon_command",
                &command.pool,
                format!("unrecognized pool '{}' ({})", command.pool, ENOENT),
            )
        })?;
        pool.size = size;

        Ok(MonCommandOutput {
            content: String::new(),
            status: format!("set pool {} size to {}", pool.id, size),
        })
    }

    fn shutdown(&mut self) {
        if self.open {
            self.open = false;
            self.state.lock().handles.connections -= 1;
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// =============================================================================
// Pool Context
// =============================================================================

struct MemoryPoolContext {
    state: SharedState,
    pool_name: String,
    pool_id: i64,
    open: bool,
}

impl MemoryPoolContext {
    fn target(&self, image: &str) -> String {
        format!("{}/{}", self.pool_name, image)
    }
}

#[async_trait]
impl PoolContext for MemoryPoolContext {
    fn pool_name(&self) -> &str {
        &self.pool_name
    }

    fn pool_id(&self) -> i64 {
        self.pool_id
    }

    async fn pool_stats(&self) -> Result<PoolStat> {
        let state = self.state.lock();
        state.check(FaultPoint::PoolStats, &self.pool_name)?;
        state
            .pool(&self.pool_name)
            .map(SimPool::stats)
            .ok_or_else(|| Error::cluster("pool_stats", &self.pool_name, format!("rados: {}", ENOENT)))
    }

    async fn create_image(&self, spec: &ImageSpec) -> Result<()> {
        let mut state = self.state.lock();
        state.check(FaultPoint::CreateImage, &spec.name)?;
        state.add_image(&self.pool_name, &spec.name, spec.size, spec.order)
    }

    async fn list_images(&self) -> Result<Vec<String>> {
        let state = self.state.lock();
        state.check(FaultPoint::ListImages, &self.pool_name)?;
        state
            .pool(&self.pool_name)
            .map(|p| p.images.keys().cloned().collect())
            .ok_or_else(|| Error::cluster("list_images", &self.pool_name, format!("rbd: {}", ENOENT)))
    }

    async fn open_image(&self, name: &str) -> Result<Box<dyn Image>> {
        let mut state = self.state.lock();
        state.check(FaultPoint::OpenImage, name)?;

        let exists = state
            .pool(&self.pool_name)
            .map_or(false, |p| p.images.contains_key(name));
        if !exists {
            return Err(Error::cluster("open_image", self.target(name), format!("rbd: {}", ENOENT)));
        }

        state.handles.images += 1;
        Ok(Box::new(MemoryImage {
            state: self.state.clone(),
            pool_name: self.pool_name.clone(),
            name: name.to_string(),
            open: true,
        }))
    }

    async fn remove_image(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.check(FaultPoint::RemoveImage, name)?;

        let target = self.target(name);
        let pool = state
            .pool_mut(&self.pool_name)
            .ok_or_else(|| Error::cluster("remove_image", &target, format!("rbd: {}", ENOENT)))?;

        if pool.images.remove(name).is_none() {
            return Err(Error::cluster("remove_image", &target, format!("rbd: {}", ENOENT)));
        }
        pool.writes += 1;
        Ok(())
    }

    fn destroy(&mut self) {
        if self.open {
            self.open = false;
            self.state.lock().handles.contexts -= 1;
        }
    }
}

impl Drop for MemoryPoolContext {
    fn drop(&mut self) {
        self.destroy();
    }
}

// =============================================================================
// Image
// =============================================================================

struct MemoryImage {
    state: SharedState,
    pool_name: String,
    name: String,
    open: bool,
}

#[async_trait]
impl Image for MemoryImage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stat(&self) -> Result<ImageInfo> {
        let mut state = self.state.lock();
        state.check(FaultPoint::StatImage, &self.name)?;

        let target = format!("{}/{}", self.pool_name, self.name);
        let pool = state
            .pool_mut(&self.pool_name)
            .ok_or_else(|| Error::cluster("stat_image", &target, format!("rbd: {}", ENOENT)))?;
        pool.reads += 1;

        let image = pool
            .images
            .get(&self.name)
            .ok_or_else(|| Error::cluster("stat_image", &target, format!("rbd: {}", ENOENT)))?;

        let obj_size = 1u64 << image.order;
        Ok(ImageInfo {
            size: image.size,
            obj_size,
            num_objs: image.size.div_ceil(obj_size),
            order: image.order,
            block_name_prefix: image.block_name_prefix.clone(),
            parent_pool: -1,
            parent_name: String::new(),
        })
    }

    async fn resize(&self, size: u64) -> Result<()> {
        let mut state = self.state.lock();
        state.check(FaultPoint::ResizeImage, &self.name)?;

        let target = format!("{}/{}", self.pool_name, self.name);
        let pool = state
            .pool_mut(&self.pool_name)
            .ok_or_else(|| Error::cluster("resize_image", &target, format!("rbd: {}", ENOENT)))?;
        let image = pool
            .images
            .get_mut(&self.name)
            .ok_or_else(|| Error::cluster("resize_image", &target, format!("rbd: {}", ENOENT)))?;

        image.size = size;
        pool.writes += 1;
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.state.lock().handles.images -= 1;
        }
    }
}

impl Drop for MemoryImage {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Simulated Device Mapper
// =============================================================================

/// Device mapper backed by a [`MemoryCluster`]
///
/// Honors the same completion bound as the real mapper: a mapping slower than
/// the timeout is abandoned and never recorded.
pub struct SimulatedDeviceMapper {
    cluster: MemoryCluster,
    timeout: Duration,
    delay: Mutex<Duration>,
    failure: Mutex<Option<String>>,
    mapped: Mutex<BTreeMap<(String, String), String>>,
    next_device: AtomicU32,
}

impl SimulatedDeviceMapper {
    pub fn new(cluster: MemoryCluster) -> Self {
        Self {
            cluster,
            timeout: DEFAULT_COMMAND_TIMEOUT,
            delay: Mutex::new(Duration::ZERO),
            failure: Mutex::new(None),
            mapped: Mutex::new(BTreeMap::new()),
            next_device: AtomicU32::new(0),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Delay every map/unmap by `delay`
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Make every map/unmap fail with `reason`
    pub fn set_failure(&self, reason: Option<&str>) {
        *self.failure.lock() = reason.map(str::to_string);
    }

    /// Device path of a mapped image
    pub fn device_path(&self, pool: &str, volume: &str) -> Option<String> {
        self.mapped
            .lock()
            .get(&(pool.to_string(), volume.to_string()))
            .cloned()
    }

    async fn run(&self, action: &str, pool: &str, volume: &str) -> Result<()> {
        let command = format!("rbd {} {} -p {}", action, volume, pool);
        let delay = *self.delay.lock();

        if tokio::time::timeout(self.timeout, tokio::time::sleep(delay))
            .await
            .is_err()
        {
            return Err(Error::CommandTimeout {
                command,
                timeout: self.timeout,
            });
        }

        if let Some(reason) = self.failure.lock().clone() {
            return Err(Error::CommandFailed { command, reason });
        }

        if !self.cluster.image_exists(pool, volume) {
            return Err(Error::CommandFailed {
                command,
                reason: format!("rbd: image {} does not exist in pool {}", volume, pool),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl DeviceMapper for SimulatedDeviceMapper {
    async fn map(&self, pool: &str, volume: &str) -> Result<String> {
        self.run("map", pool, volume).await?;

        let mut mapped = self.mapped.lock();
        let key = (pool.to_string(), volume.to_string());
        if let Some(path) = mapped.get(&key) {
            return Ok(path.clone());
        }

        // Device numbers are never reused within one mapper
        let path = format!("/dev/rbd{}", self.next_device.fetch_add(1, Ordering::Relaxed));
        mapped.insert(key, path.clone());
        Ok(path)
    }

    async fn unmap(&self, pool: &str, volume: &str) -> Result<()> {
        self.run("unmap", pool, volume).await?;

        let key = (pool.to_string(), volume.to_string());
        if self.mapped.lock().remove(&key).is_none() {
            return Err(Error::CommandFailed {
                command: format!("rbd unmap {} -p {}", volume, pool),
                reason: "rbd: not mapped".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_pool_lifecycle() {
        let cluster = MemoryCluster::new();
        let conn = cluster.connect().await.unwrap();

        conn.make_pool("rbd").await.unwrap();
        conn.make_pool("ssd").await.unwrap();
        assert_eq!(conn.list_pools().await.unwrap(), vec!["rbd", "ssd"]);

        let err = conn.make_pool("rbd").await.unwrap_err();
        assert_eq!(err.cluster_reason(), Some("rados: ret=-17, File exists"));

        conn.delete_pool("rbd").await.unwrap();
        assert!(conn.delete_pool("rbd").await.is_err());
        assert_matches!(conn.lookup_pool("rbd").await, Err(Error::PoolNotFound { .. }));
    }

    #[tokio::test]
    async fn test_handle_accounting() {
        let cluster = MemoryCluster::with_pools(&["rbd"]);
        let mut conn = cluster.connect().await.unwrap();
        let mut ctx = conn.open_pool("rbd").await.unwrap();
        assert_eq!(cluster.handles().contexts, 1);

        ctx.destroy();
        ctx.destroy();
        conn.shutdown();
        assert_eq!(cluster.handles(), HandleCounts { peak_contexts: 1, ..Default::default() });
    }

    #[tokio::test]
    async fn test_image_stat() {
        let cluster = MemoryCluster::with_pools(&["rbd"]);
        let conn = cluster.connect().await.unwrap();
        let ctx = conn.open_pool("rbd").await.unwrap();

        ctx.create_image(&ImageSpec {
            name: "vol1".into(),
            size: 1 << 30,
            order: 22,
            features: 1,
        })
        .await
        .unwrap();

        let image = ctx.open_image("vol1").await.unwrap();
        let info = image.stat().await.unwrap();
        assert_eq!(info.size, 1 << 30);
        assert_eq!(info.obj_size, 4 * 1024 * 1024);
        assert_eq!(info.num_objs, 256);
        assert!(info.block_name_prefix.starts_with("rbd_data."));
    }

    #[tokio::test]
    async fn test_fault_targets_one_pool() {
        let cluster = MemoryCluster::with_pools(&["a", "b"]);
        cluster.inject_fault(FaultPoint::PoolStats, Some("b"), "boom");
        let conn = cluster.connect().await.unwrap();

        assert!(conn.open_pool("a").await.unwrap().pool_stats().await.is_ok());
        assert!(conn.open_pool("b").await.unwrap().pool_stats().await.is_err());
    }

    #[tokio::test]
    async fn test_mon_command_pool_size() {
        let cluster = MemoryCluster::with_pools(&["rbd"]);
        let conn = cluster.connect().await.unwrap();

        conn.mon_command(&MonCommand::pool_set("rbd", "size", 2)).await.unwrap();
        assert_eq!(cluster.pool_size("rbd"), Some(2));

        assert!(conn.mon_command(&MonCommand::pool_set("rbd", "size", 0)).await.is_err());
        assert!(conn.mon_command(&MonCommand::pool_set("nope", "size", 2)).await.is_err());
    }

    #[tokio::test]
    async fn test_simulated_mapper() {
        let cluster = MemoryCluster::with_pools(&["rbd"]);
        cluster.seed_image("rbd", "vol1", 1024);
        let mapper = SimulatedDeviceMapper::new(cluster.clone());

        let path = mapper.map("rbd", "vol1").await.unwrap();
        assert_eq!(path, "/dev/rbd0");
        assert_eq!(mapper.device_path("rbd", "vol1").as_deref(), Some("/dev/rbd0"));

        mapper.unmap("rbd", "vol1").await.unwrap();
        assert!(mapper.unmap("rbd", "vol1").await.is_err());
        assert!(mapper.map("rbd", "missing").await.is_err());
    }

    #[tokio::test]
    async fn test_simulated_mapper_device_paths_stay_unique() {
        let cluster = MemoryCluster::with_pools(&["rbd"]);
        for name in ["a", "b", "c"] {
            cluster.seed_image("rbd", name, 1024);
        }
        let mapper = SimulatedDeviceMapper::new(cluster);

        assert_eq!(mapper.map("rbd", "a").await.unwrap(), "/dev/rbd0");
        assert_eq!(mapper.map("rbd", "b").await.unwrap(), "/dev/rbd1");
        mapper.unmap("rbd", "a").await.unwrap();

        let c = mapper.map("rbd", "c").await.unwrap();
        assert_eq!(c, "/dev/rbd2");
        assert_ne!(Some(c), mapper.device_path("rbd", "b"));
    }

    #[tokio::test]
    async fn test_simulated_mapper_timeout_is_not_recorded() {
        let cluster = MemoryCluster::with_pools(&["rbd"]);
        cluster.seed_image("rbd", "vol1", 1024);
        let mapper = SimulatedDeviceMapper::new(cluster).with_timeout(Duration::from_millis(50));
        mapper.set_delay(Duration::from_millis(500));

        let err = mapper.map("rbd", "vol1").await.unwrap_err();
        assert_matches!(err, Error::CommandTimeout { .. });
        assert!(mapper.device_path("rbd", "vol1").is_none());
    }
}
