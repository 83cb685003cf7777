//! Service Configuration
//!
//! Layered configuration: built-in defaults, then an optional YAML file,
//! then command-line / environment overrides applied by the binary.

use crate::controlplane::aggregation::DEFAULT_MAX_CONCURRENCY;
use crate::controlplane::backends::{BackendKind, CephConfig, DeviceConfig, StoreConfig, StoreKind};
use crate::controlplane::orchestrator::OrchestratorConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

// =============================================================================
// Sections
// =============================================================================

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub listen_addr: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8090)),
        }
    }
}

/// Simulated cluster settings used in standalone mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StandaloneConfig {
    /// Pools present at startup
    pub pools: Vec<String>,
}

impl Default for StandaloneConfig {
    fn default() -> Self {
        Self {
            pools: vec!["rbd".to_string()],
        }
    }
}

/// Pool fan-out settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub max_concurrency: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

/// Multi-step workflow settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub rollback_on_failure: bool,
}

// =============================================================================
// Service Configuration
// =============================================================================

/// Complete gateway configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub api: ApiConfig,
    pub backend: BackendKind,
    pub standalone: StandaloneConfig,
    pub ceph: CephConfig,
    pub device: DeviceConfig,
    pub store: StoreConfig,
    pub aggregation: AggregationConfig,
    pub workflow: WorkflowConfig,
}

impl ServiceConfig {
    /// Parse a YAML document; missing keys keep their defaults
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;

        let config = Self::from_yaml(&content)?;
        debug!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.device.map_timeout.is_zero() {
            return Err(Error::Configuration("device.map_timeout must be positive".into()));
        }
        if self.ceph.command_timeout.is_zero() {
            return Err(Error::Configuration("ceph.command_timeout must be positive".into()));
        }
        if self.ceph.pg_num == 0 {
            return Err(Error::Configuration("ceph.pg_num must be positive".into()));
        }
        if self.aggregation.max_concurrency == 0 {
            return Err(Error::Configuration(
                "aggregation.max_concurrency must be at least 1".into(),
            ));
        }
        if self.store.kind == StoreKind::File && self.store.path.is_none() {
            return Err(Error::Configuration("store.path is required for a file store".into()));
        }
        Ok(())
    }

    /// Orchestrator settings derived from this configuration
    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_concurrency: self.aggregation.max_concurrency,
            rollback_on_failure: self.workflow.rollback_on_failure,
        }
    }
}

/// Durations written as (possibly fractional) seconds
pub mod duration_secs {
    use super::Duration;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.api.listen_addr.port(), 8090);
        assert_eq!(config.backend, BackendKind::Standalone);
        assert_eq!(config.device.map_timeout, Duration::from_secs(5));
        assert_eq!(config.device.rbd_binary, "rbd");
        assert_eq!(config.aggregation.max_concurrency, 1);
        assert!(!config.workflow.rollback_on_failure);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml() {
        let config = ServiceConfig::from_yaml(
            r#"
backend: ceph
ceph:
  conf_path: /etc/ceph/ceph.conf
  client_id: admin
device:
  map_timeout: 2.5
aggregation:
  max_concurrency: 4
workflow:
  rollback_on_failure: true
"#,
        )
        .unwrap();

        assert_eq!(config.backend, BackendKind::Ceph);
        assert_eq!(config.ceph.conf_path.as_deref(), Some("/etc/ceph/ceph.conf"));
        assert_eq!(config.ceph.rbd_binary, "rbd");
        assert_eq!(config.device.map_timeout, Duration::from_millis(2500));
        assert_eq!(config.orchestrator().max_concurrency, 4);
        assert!(config.orchestrator().rollback_on_failure);
        assert_eq!(config.api.listen_addr.port(), 8090);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = ServiceConfig::default();
        config.device.map_timeout = Duration::ZERO;
        assert_matches!(config.validate(), Err(Error::Configuration(_)));

        let mut config = ServiceConfig::default();
        config.aggregation.max_concurrency = 0;
        assert_matches!(config.validate(), Err(Error::Configuration(_)));

        let mut config = ServiceConfig::default();
        config.store.kind = StoreKind::File;
        assert_matches!(config.validate(), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_negative_duration_rejected() {
        let result = ServiceConfig::from_yaml("device:\n  map_timeout: -1\n");
        assert_matches!(result, Err(Error::YamlParse(_)));
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "api:\n  listen_addr: 127.0.0.1:9000").unwrap();

        let config = ServiceConfig::load(file.path()).unwrap();
        assert_eq!(config.api.listen_addr, "127.0.0.1:9000".parse().unwrap());

        assert_matches!(
            ServiceConfig::load("/nonexistent/ebs.yaml"),
            Err(Error::Configuration(_))
        );
    }
}
