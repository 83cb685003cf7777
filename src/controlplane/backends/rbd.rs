//! RBD Device Mapper
//!
//! Maps images to local block devices by running the rbd executable as
//! `<rbd> (map|unmap) <volume> -p <pool>`. The device path is read from
//! standard output. Every run is bounded; a run that overstays its bound is
//! killed.

use crate::domain::ports::DeviceMapper;
use crate::error::{Error, Result};
use crate::exec::{BoundedCommand, DEFAULT_COMMAND_TIMEOUT};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the rbd device mapper
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Path or name of the rbd executable
    pub rbd_binary: String,
    /// Bound on each map/unmap invocation
    #[serde(with = "crate::config::duration_secs")]
    pub map_timeout: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            rbd_binary: "rbd".to_string(),
            map_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

// =============================================================================
// RBD Device Mapper
// =============================================================================

/// Device mapper driving the rbd executable
pub struct RbdDeviceMapper {
    config: DeviceConfig,
}

impl RbdDeviceMapper {
    pub fn new(config: DeviceConfig) -> Self {
        Self { config }
    }

    fn command(&self, action: &str, pool: &str, volume: &str) -> BoundedCommand {
        BoundedCommand::new(&self.config.rbd_binary)
            .args([action, volume, "-p", pool])
            .timeout(self.config.map_timeout)
    }
}

#[async_trait]
impl DeviceMapper for RbdDeviceMapper {
    async fn map(&self, pool: &str, volume: &str) -> Result<String> {
        let command = self.command("map", pool, volume);
        let output = command.run().await?;

        let device_path = output.stdout.trim_end_matches(['\n', '\r']).to_string();
        if device_path.is_empty() {
            return Err(Error::CommandFailed {
                command: command.display(),
                reason: "no device path on stdout".into(),
            });
        }

        debug!(
            "Mapped {}/{} to {} in {:?}",
            pool, volume, device_path, output.elapsed
        );
        Ok(device_path)
    }

    async fn unmap(&self, pool: &str, volume: &str) -> Result<()> {
        let output = self.command("unmap", pool, volume).run().await?;
        debug!("Unmapped {}/{} in {:?}", pool, volume, output.elapsed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::time::Instant;
    use tempfile::TempDir;

    fn script(dir: &Path, body: &str) -> String {
        let path = dir.join("rbd");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn mapper(binary: String, timeout: Duration) -> RbdDeviceMapper {
        RbdDeviceMapper::new(DeviceConfig {
            rbd_binary: binary,
            map_timeout: timeout,
        })
    }

    #[tokio::test]
    async fn test_map_reads_device_path() {
        let dir = TempDir::new().unwrap();
        let args_file = dir.path().join("args");
        let binary = script(
            dir.path(),
            &format!("echo \"$@\" > {}\necho /dev/rbd3", args_file.display()),
        );

        let path = mapper(binary, Duration::from_secs(5))
            .map("rbd", "test1")
            .await
            .unwrap();
        assert_eq!(path, "/dev/rbd3");

        let args = std::fs::read_to_string(args_file).unwrap();
        assert_eq!(args.trim(), "map test1 -p rbd");
    }

    #[tokio::test]
    async fn test_map_empty_output_fails() {
        let dir = TempDir::new().unwrap();
        let binary = script(dir.path(), "exit 0");

        let err = mapper(binary, Duration::from_secs(5))
            .map("rbd", "test1")
            .await
            .unwrap_err();
        assert_matches!(err, Error::CommandFailed { .. });
    }

    #[tokio::test]
    async fn test_map_failure_carries_stderr() {
        let dir = TempDir::new().unwrap();
        let binary = script(dir.path(), "echo 'rbd: sysfs write failed' >&2\nexit 1");

        let err = mapper(binary, Duration::from_secs(5))
            .map("rbd", "test1")
            .await
            .unwrap_err();
        assert_matches!(err, Error::CommandFailed { ref reason, .. } if reason.contains("sysfs write failed"));
    }

    #[tokio::test]
    async fn test_map_timeout() {
        let dir = TempDir::new().unwrap();
        let binary = script(dir.path(), "sleep 30\necho /dev/rbd0");

        let started = Instant::now();
        let err = mapper(binary, Duration::from_millis(200))
            .map("rbd", "test1")
            .await
            .unwrap_err();
        assert_matches!(err, Error::CommandTimeout { .. });
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_unmap() {
        let dir = TempDir::new().unwrap();
        let args_file = dir.path().join("args");
        let binary = script(dir.path(), &format!("echo \"$@\" > {}", args_file.display()));

        mapper(binary, Duration::from_secs(5))
            .unmap("rbd", "test1")
            .await
            .unwrap();
        let args = std::fs::read_to_string(args_file).unwrap();
        assert_eq!(args.trim(), "unmap test1 -p rbd");
    }
}
