//! API Module
//!
//! HTTP surface of the gateway: the action router, its metrics and the
//! server that hosts them.

pub mod metrics;
pub mod rest;
pub mod server;

pub use metrics::ApiMetrics;
pub use rest::{parse_size, Action, ActionParams, AppState, RestRouter, VOLUME_STATE_HEADER};
pub use server::{ApiServer, ApiServerConfig};
