//! Volume Record Stores
//!
//! Persistence adapters for volume records. The memory store is used in
//! standalone mode and tests; the file store appends one JSON document per
//! line and reloads the file on startup.

use crate::domain::ports::{VolumeRecord, VolumeStore};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

type RecordKey = (String, String);

fn key_of(record: &VolumeRecord) -> RecordKey {
    (record.pool.clone(), record.name.clone())
}

fn exists(record: &VolumeRecord) -> Error {
    Error::ResourceExists {
        kind: "VolumeRecord".into(),
        name: format!("{}/{}", record.pool, record.name),
    }
}

// =============================================================================
// Memory Store
// =============================================================================

/// In-memory volume records
#[derive(Default)]
pub struct MemoryVolumeStore {
    records: RwLock<BTreeMap<RecordKey, VolumeRecord>>,
}

impl MemoryVolumeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VolumeStore for MemoryVolumeStore {
    async fn insert(&self, record: VolumeRecord) -> Result<()> {
        let mut records = self.records.write();
        let key = key_of(&record);
        if records.contains_key(&key) {
            return Err(exists(&record));
        }
        records.insert(key, record);
        Ok(())
    }

    async fn get(&self, pool: &str, name: &str) -> Result<Option<VolumeRecord>> {
        Ok(self
            .records
            .read()
            .get(&(pool.to_string(), name.to_string()))
            .cloned())
    }

    async fn list(&self) -> Result<Vec<VolumeRecord>> {
        Ok(self.records.read().values().cloned().collect())
    }
}

// =============================================================================
// File Store
// =============================================================================

/// Volume records appended to a JSON-lines file
pub struct FileVolumeStore {
    path: PathBuf,
    /// Serializes appends; also guards the index against interleaved inserts
    records: Mutex<BTreeMap<RecordKey, VolumeRecord>>,
}

impl FileVolumeStore {
    /// Open the store, loading any records already in `path`
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let records = Self::load(&path).await?;
        info!(
            "Volume store opened at {} ({} records)",
            path.display(),
            records.len()
        );

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    async fn load(path: &Path) -> Result<BTreeMap<RecordKey, VolumeRecord>> {
        let mut records = BTreeMap::new();

        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e.into()),
        };

        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: VolumeRecord = serde_json::from_str(line).map_err(|e| {
                Error::Persistence(format!("{}:{}: {}", path.display(), lineno + 1, e))
            })?;
            if records.insert(key_of(&record), record).is_some() {
                warn!("Duplicate volume record at {}:{}", path.display(), lineno + 1);
            }
        }

        Ok(records)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl VolumeStore for FileVolumeStore {
    async fn insert(&self, record: VolumeRecord) -> Result<()> {
        let mut records = self.records.lock().await;
        let key = key_of(&record);
        if records.contains_key(&key) {
            return Err(exists(&record));
        }

        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::Persistence(format!("{}: {}", self.path.display(), e)))?;
        file.write_all(&line)
            .await
            .map_err(|e| Error::Persistence(format!("{}: {}", self.path.display(), e)))?;
        file.sync_data()
            .await
            .map_err(|e| Error::Persistence(format!("{}: {}", self.path.display(), e)))?;

        debug!("Volume record appended: {}/{}", record.pool, record.name);
        records.insert(key, record);
        Ok(())
    }

    async fn get(&self, pool: &str, name: &str) -> Result<Option<VolumeRecord>> {
        Ok(self
            .records
            .lock()
            .await
            .get(&(pool.to_string(), name.to_string()))
            .cloned())
    }

    async fn list(&self) -> Result<Vec<VolumeRecord>> {
        Ok(self.records.lock().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use tempfile::TempDir;

    fn record(pool: &str, name: &str, size: u64) -> VolumeRecord {
        let now = Utc::now();
        VolumeRecord {
            pool: pool.into(),
            name: name.into(),
            size,
            device_path: "/dev/rbd0".into(),
            identifier: "1.rbd_data.10006b8b4568".into(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryVolumeStore::new();
        store.insert(record("rbd", "vol1", 1024)).await.unwrap();

        assert_matches!(
            store.insert(record("rbd", "vol1", 2048)).await,
            Err(Error::ResourceExists { .. })
        );
        assert_eq!(store.get("rbd", "vol1").await.unwrap().unwrap().size, 1024);
        assert!(store.get("ssd", "vol1").await.unwrap().is_none());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_file_store_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("volumes.jsonl");

        {
            let store = FileVolumeStore::open(&path).await.unwrap();
            store.insert(record("rbd", "vol1", 1024)).await.unwrap();
            store.insert(record("rbd", "vol2", 2048)).await.unwrap();
            assert!(store.insert(record("rbd", "vol1", 1)).await.is_err());
        }

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);

        let store = FileVolumeStore::open(&path).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 2);
        assert_eq!(store.get("rbd", "vol2").await.unwrap().unwrap().size, 2048);
        assert_matches!(
            store.insert(record("rbd", "vol2", 1)).await,
            Err(Error::ResourceExists { .. })
        );
    }

    #[tokio::test]
    async fn test_file_store_corrupt_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("volumes.jsonl");
        std::fs::write(&path, "{not json}\n").unwrap();

        let err = FileVolumeStore::open(&path).await.err().unwrap();
        assert_matches!(err, Error::Persistence(ref msg) if msg.contains(":1:"));
    }
}
