//! Error types for the EBS gateway
//!
//! Internal, fully diagnosable causes. These never cross the HTTP boundary
//! directly: the orchestrator logs them and collapses each one into a
//! [`Status`](crate::controlplane::status::Status) code.

use std::time::Duration;
use thiserror::Error;

/// Stage of cluster session establishment that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStage {
    /// Creating the connection handle
    Init,
    /// Loading the cluster configuration file
    ReadConfig,
    /// Connecting and authenticating
    Connect,
    /// Opening the per-pool I/O context
    OpenContext,
}

impl std::fmt::Display for SessionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStage::Init => write!(f, "init"),
            SessionStage::ReadConfig => write!(f, "read-config"),
            SessionStage::Connect => write!(f, "connect"),
            SessionStage::OpenContext => write!(f, "open-context"),
        }
    }
}

/// Unified error type for the gateway
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Cluster Errors
    // =========================================================================
    #[error("Cluster session failed at {stage}: {reason}")]
    Session { stage: SessionStage, reason: String },

    #[error("Cluster operation {operation} on {target} failed: {reason}")]
    Cluster {
        operation: String,
        target: String,
        reason: String,
    },

    #[error("Pool not found: {pool}")]
    PoolNotFound { pool: String },

    #[error("Image not found: {pool}/{image}: {reason}")]
    ImageNotFound {
        pool: String,
        image: String,
        reason: String,
    },

    #[error("Resize of {volume} to {size} bytes failed: {source}")]
    ResizeFailed {
        volume: String,
        size: u64,
        #[source]
        source: Box<Error>,
    },

    #[error("Invalid volume state: {volume} is {state}, expected {expected}")]
    InvalidVolumeState {
        volume: String,
        state: String,
        expected: String,
    },

    // =========================================================================
    // External Command Errors
    // =========================================================================
    #[error("Command failed: {command} - {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("Command timed out: {command} after {timeout:?}")]
    CommandTimeout { command: String, timeout: Duration },

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    // =========================================================================
    // API Errors
    // =========================================================================
    #[error("API request validation failed: {0}")]
    ApiValidation(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a cluster operation error
    pub fn cluster(
        operation: impl Into<String>,
        target: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Error::Cluster {
            operation: operation.into(),
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Build a session establishment error
    pub fn session(stage: SessionStage, reason: impl Into<String>) -> Self {
        Error::Session {
            stage,
            reason: reason.into(),
        }
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        match self {
            Error::ResizeFailed { source, .. } => source.is_transient(),
            _ => matches!(
                self,
                Error::Session { .. } | Error::CommandTimeout { .. } | Error::Io(_)
            ),
        }
    }

    /// Diagnostic text reported by the cluster, if this error carries one
    pub fn cluster_reason(&self) -> Option<&str> {
        match self {
            Error::Cluster { reason, .. } | Error::ImageNotFound { reason, .. }
                if !reason.is_empty() =>
            {
                Some(reason)
            }
            _ => None,
        }
    }
}

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_transient() {
        let err = Error::session(SessionStage::Connect, "connection refused");
        assert!(err.is_transient());

        let err = Error::CommandTimeout {
            command: "rbd map".into(),
            timeout: Duration::from_secs(5),
        };
        assert!(err.is_transient());

        let err = Error::Configuration("bad config".into());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_cluster_reason() {
        let err = Error::cluster("make_pool", "rbd", "(17) File exists");
        assert_eq!(err.cluster_reason(), Some("(17) File exists"));

        let err = Error::cluster("make_pool", "rbd", "");
        assert_eq!(err.cluster_reason(), None);

        let err = Error::PoolNotFound { pool: "rbd".into() };
        assert_eq!(err.cluster_reason(), None);

        let err = Error::ImageNotFound {
            pool: "rbd".into(),
            image: "vol1".into(),
            reason: "(2) No such file or directory".into(),
        };
        assert_eq!(err.cluster_reason(), Some("(2) No such file or directory"));
    }

    #[test]
    fn test_resize_failed_hides_cluster_reason() {
        let err = Error::ResizeFailed {
            volume: "rbd/vol1".into(),
            size: 1024,
            source: Box::new(Error::cluster("resize_image", "rbd/vol1", "(28) No space left")),
        };
        assert_eq!(err.cluster_reason(), None);
        assert!(!err.is_transient());
        assert!(err.to_string().contains("(28) No space left"));
    }

    #[test]
    fn test_session_display() {
        let err = Error::session(SessionStage::OpenContext, "no such pool");
        assert_eq!(
            err.to_string(),
            "Cluster session failed at open-context: no such pool"
        );
    }
}
