//! REST API Handlers
//!
//! The gateway's HTTP surface: a single `GET /?Action=<name>&...` endpoint
//! dispatching to the orchestrator, plus health and metrics endpoints.
//!
//! Success is `200` with `application/json` and a newline-terminated body.
//! Failure uses the catalog code itself as the HTTP status with a plain-text
//! newline-terminated message.

use super::metrics::ApiMetrics;
use crate::controlplane::orchestrator::Orchestrator;
use crate::controlplane::pool::PoolSelector;
use crate::controlplane::status::Failure;
use crate::error::{Error, Result};
use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

/// Header reporting how far a CreateDisk got before failing
pub const VOLUME_STATE_HEADER: &str = "x-volume-state";

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const APPLICATION_JSON: &str = "application/json";

// =============================================================================
// Actions
// =============================================================================

/// Operation selected by the `Action` query parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreatePool,
    InfoPool,
    InfoPoolIo,
    DelPool,
    ModPoolRepSize,
    CreateDisk,
    InfoVolume,
    DelVolume,
    ResizeVolume,
    ExportVolume,
    DelDisk,
    ExtendDisk,
    AttachDisk,
    DetachDisk,
    BackupDisk,
}

impl Action {
    pub const ALL: [Action; 15] = [
        Action::CreatePool,
        Action::InfoPool,
        Action::InfoPoolIo,
        Action::DelPool,
        Action::ModPoolRepSize,
        Action::CreateDisk,
        Action::InfoVolume,
        Action::DelVolume,
        Action::ResizeVolume,
        Action::ExportVolume,
        Action::DelDisk,
        Action::ExtendDisk,
        Action::AttachDisk,
        Action::DetachDisk,
        Action::BackupDisk,
    ];

    /// Token as it appears in the query string
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::CreatePool => "CreatePool",
            Action::InfoPool => "InfoPool",
            Action::InfoPoolIo => "InfoPoolIO",
            Action::DelPool => "DelPool",
            Action::ModPoolRepSize => "ModPoolRepSize",
            Action::CreateDisk => "CreateDisk",
            Action::InfoVolume => "InfoVolume",
            Action::DelVolume => "DelVolume",
            Action::ResizeVolume => "ResizeVolume",
            Action::ExportVolume => "ExportVolume",
            Action::DelDisk => "DelDisk",
            Action::ExtendDisk => "ExtendDisk",
            Action::AttachDisk => "AttachDisk",
            Action::DetachDisk => "DetachDisk",
            Action::BackupDisk => "BackupDisk",
        }
    }

    pub fn parse(token: &str) -> Option<Action> {
        Action::ALL.iter().copied().find(|a| a.as_str() == token)
    }

    /// Accepted but not implemented
    pub fn is_stub(&self) -> bool {
        matches!(
            self,
            Action::ExportVolume
                | Action::DelDisk
                | Action::ExtendDisk
                | Action::AttachDisk
                | Action::DetachDisk
                | Action::BackupDisk
        )
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Query parameters of an action request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionParams {
    #[serde(rename = "Action")]
    pub action: Option<String>,
    #[serde(rename = "PoolName")]
    pub pool_name: Option<String>,
    #[serde(rename = "VolumeName")]
    pub volume_name: Option<String>,
    #[serde(rename = "Size")]
    pub size: Option<String>,
}

impl ActionParams {
    fn require<'a>(value: &'a Option<String>, name: &str) -> std::result::Result<&'a str, Reply> {
        match value.as_deref() {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(Reply::bad_request(format!("missing {}", name))),
        }
    }

    fn pool(&self) -> std::result::Result<&str, Reply> {
        Self::require(&self.pool_name, "PoolName")
    }

    fn volume(&self) -> std::result::Result<&str, Reply> {
        Self::require(&self.volume_name, "VolumeName")
    }

    fn size(&self) -> std::result::Result<&str, Reply> {
        Self::require(&self.size, "Size")
    }

    fn size_bytes(&self) -> std::result::Result<u64, Reply> {
        parse_size(self.size()?).map_err(|e| Reply::bad_request(e.to_string()))
    }
}

// =============================================================================
// Replies
// =============================================================================

/// Outcome of one request, before it becomes an HTTP response
#[derive(Debug)]
enum Reply {
    Success(Vec<u8>),
    Failed(Failure),
    Rejected(StatusCode),
}

impl Reply {
    fn ok() -> Self {
        Reply::Success(b"OK".to_vec())
    }

    fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Reply::Success(body),
            Err(e) => {
                error!("Failed to encode response: {}", e);
                Reply::Rejected(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    fn bad_request(reason: String) -> Self {
        debug!("Rejecting request: {}", reason);
        Reply::Rejected(StatusCode::BAD_REQUEST)
    }

    fn code(&self) -> u16 {
        match self {
            Reply::Success(_) => StatusCode::OK.as_u16(),
            Reply::Failed(failure) => failure.status.code(),
            Reply::Rejected(status) => status.as_u16(),
        }
    }
}

impl From<Failure> for Reply {
    fn from(failure: Failure) -> Self {
        Reply::Failed(failure)
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        match self {
            Reply::Success(mut body) => {
                body.push(b'\n');
                (
                    StatusCode::OK,
                    [(header::CONTENT_TYPE, APPLICATION_JSON)],
                    body,
                )
                    .into_response()
            }
            Reply::Failed(failure) => failure.into_response(),
            Reply::Rejected(status) => {
                text_error(status, status.canonical_reason().unwrap_or("Error"))
            }
        }
    }
}

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status.code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = text_error(status, self.message());

        if let Some(progress) = self.progress {
            response.headers_mut().insert(
                HeaderName::from_static(VOLUME_STATE_HEADER),
                HeaderValue::from_static(progress.as_str()),
            );
        }
        response
    }
}

fn text_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        [
            (header::CONTENT_TYPE, TEXT_PLAIN),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        ],
        format!("{}\n", message),
    )
        .into_response()
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    orchestrator: Arc<Orchestrator>,
    metrics: ApiMetrics,
}

impl RestRouter {
    /// Create a new REST router with its own metrics registry
    pub fn new(orchestrator: Arc<Orchestrator>) -> Result<Self> {
        Ok(Self::with_metrics(orchestrator, ApiMetrics::new()?))
    }

    pub fn with_metrics(orchestrator: Arc<Orchestrator>, metrics: ApiMetrics) -> Self {
        Self {
            orchestrator,
            metrics,
        }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            orchestrator: self.orchestrator,
            metrics: self.metrics,
        };

        Router::new()
            .route("/", any(dispatch))
            .route("/healthz", get(health_check))
            .route("/metrics", get(render_metrics))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub metrics: ApiMetrics,
}

// =============================================================================
// Handlers
// =============================================================================

/// Dispatch on `Action`
async fn dispatch(
    State(state): State<AppState>,
    method: Method,
    params: std::result::Result<Query<ActionParams>, QueryRejection>,
) -> impl IntoResponse {
    let started = Instant::now();

    let (label, reply) = match params {
        _ if method != Method::GET => ("unknown", Reply::Rejected(StatusCode::METHOD_NOT_ALLOWED)),
        Err(rejection) => ("unknown", Reply::bad_request(rejection.body_text())),
        Ok(Query(params)) => match params.action.as_deref().and_then(Action::parse) {
            None => (
                "unknown",
                Reply::bad_request(format!("unknown action {:?}", params.action)),
            ),
            Some(action) => {
                let reply = match execute(&state.orchestrator, action, &params).await {
                    Ok(reply) | Err(reply) => reply,
                };
                (action.as_str(), reply)
            }
        },
    };

    let code = reply.code();
    state.metrics.observe(label, code, started.elapsed());
    info!("{} {} -> {}", method, label, code);

    reply
}

async fn execute(
    orchestrator: &Orchestrator,
    action: Action,
    params: &ActionParams,
) -> std::result::Result<Reply, Reply> {
    if action.is_stub() {
        return Ok(Reply::Rejected(StatusCode::NOT_IMPLEMENTED));
    }

    match action {
        Action::CreatePool => {
            orchestrator.create_pool(params.pool()?).await?;
            Ok(Reply::ok())
        }
        Action::InfoPool => {
            let selector = PoolSelector::parse(params.pool()?);
            Ok(Reply::json(&orchestrator.info_pools(&selector).await?))
        }
        Action::InfoPoolIo => {
            let selector = PoolSelector::parse(params.pool()?);
            Ok(Reply::json(&orchestrator.info_pools_io(&selector).await?))
        }
        Action::DelPool => {
            orchestrator.delete_pool(params.pool()?).await?;
            Ok(Reply::ok())
        }
        Action::ModPoolRepSize => {
            let pool = params.pool()?;
            let size: u32 = params
                .size()?
                .parse()
                .map_err(|_| Reply::bad_request("Size must be an unsigned integer".into()))?;
            orchestrator.set_pool_replica_size(pool, size).await?;
            Ok(Reply::ok())
        }
        Action::CreateDisk => {
            let (pool, volume, size) = (params.pool()?, params.volume()?, params.size_bytes()?);
            orchestrator.create_disk(pool, volume, size).await?;
            Ok(Reply::ok())
        }
        Action::InfoVolume => {
            let selector = PoolSelector::parse(params.pool()?);
            Ok(Reply::json(&orchestrator.info_volumes(&selector).await?))
        }
        Action::DelVolume => {
            orchestrator
                .delete_volume(params.pool()?, params.volume()?)
                .await?;
            Ok(Reply::ok())
        }
        Action::ResizeVolume => {
            let (pool, volume, size) = (params.pool()?, params.volume()?, params.size_bytes()?);
            orchestrator.resize_volume(pool, volume, size).await?;
            Ok(Reply::ok())
        }
        _ => Ok(Reply::Rejected(StatusCode::NOT_IMPLEMENTED)),
    }
}

/// Health check
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Prometheus exposition
async fn render_metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok((content_type, body)) => {
            (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], body).into_response()
        }
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            text_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Parse a size in bytes, optionally with a binary unit ("1073741824", "1Gi", "512M")
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::ApiValidation("empty size".into()));
    }

    let num_end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map_or(s.len(), |(i, _)| i);

    let num_str = &s[..num_end];
    let unit_str = s[num_end..].trim();

    let num: u64 = num_str
        .parse()
        .map_err(|_| Error::ApiValidation(format!("invalid size: {}", s)))?;

    let multiplier: u64 = match unit_str.to_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KI" | "KIB" => 1 << 10,
        "M" | "MI" | "MIB" => 1 << 20,
        "G" | "GI" | "GIB" => 1 << 30,
        "T" | "TI" | "TIB" => 1 << 40,
        _ => {
            return Err(Error::ApiValidation(format!("unknown size unit: {}", unit_str)));
        }
    };

    num.checked_mul(multiplier)
        .ok_or_else(|| Error::ApiValidation(format!("size out of range: {}", s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::backends::memory::{MemoryCluster, SimulatedDeviceMapper};
    use crate::controlplane::backends::store::MemoryVolumeStore;
    use crate::controlplane::orchestrator::OrchestratorConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    struct Fixture {
        cluster: MemoryCluster,
        mapper: Arc<SimulatedDeviceMapper>,
        router: Router,
    }

    fn fixture() -> Fixture {
        let cluster = MemoryCluster::with_pools(&["rbd"]);
        let mapper = Arc::new(
            SimulatedDeviceMapper::new(cluster.clone()).with_timeout(Duration::from_millis(100)),
        );
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::default(),
            Arc::new(cluster.clone()),
            mapper.clone(),
            Arc::new(MemoryVolumeStore::new()),
        );
        let router = RestRouter::new(orchestrator).unwrap().build();

        Fixture {
            cluster,
            mapper,
            router,
        }
    }

    async fn call(router: &Router, method: Method, uri: &str) -> (StatusCode, Response<()>, String) {
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let (parts, body) = response.into_parts();
        let bytes = to_bytes(body, usize::MAX).await.unwrap();
        (
            parts.status,
            Response::from_parts(parts, ()),
            String::from_utf8(bytes.to_vec()).unwrap(),
        )
    }

    async fn get(router: &Router, uri: &str) -> (StatusCode, Response<()>, String) {
        call(router, Method::GET, uri).await
    }

    fn content_type(response: &Response<()>) -> &str {
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("100").unwrap(), 100);
        assert_eq!(parse_size("1073741824").unwrap(), 1 << 30);
        assert_eq!(parse_size("1Ki").unwrap(), 1024);
        assert_eq!(parse_size("512M").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_size("1Gi").unwrap(), 1 << 30);
        assert_eq!(parse_size("2T").unwrap(), 2 << 40);

        assert!(parse_size("").is_err());
        assert!(parse_size("abc").is_err());
        assert!(parse_size("-1").is_err());
        assert!(parse_size("1.5G").is_err());
        assert!(parse_size("100X").is_err());
        assert!(parse_size("99999999999T").is_err());
    }

    #[test]
    fn test_action_tokens() {
        for action in Action::ALL {
            assert_eq!(Action::parse(action.as_str()), Some(action));
        }
        assert_eq!(Action::parse("InfoPoolIO"), Some(Action::InfoPoolIo));
        assert_eq!(Action::parse("infopool"), None);
        assert!(Action::BackupDisk.is_stub());
        assert!(!Action::ResizeVolume.is_stub());
    }

    #[tokio::test]
    async fn test_create_pool() {
        let f = fixture();

        let (status, response, body) = get(&f.router, "/?Action=CreatePool&PoolName=ssd").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type(&response), "application/json");
        assert_eq!(body, "OK\n");
        assert_eq!(f.cluster.pool_names(), vec!["rbd", "ssd"]);

        let (status, response, body) = get(&f.router, "/?Action=CreatePool&PoolName=ssd").await;
        assert_eq!(status.as_u16(), 705);
        assert_eq!(content_type(&response), "text/plain; charset=utf-8");
        assert_eq!(
            response.headers().get(header::X_CONTENT_TYPE_OPTIONS).unwrap(),
            "nosniff"
        );
        assert_eq!(body, "rados: ret=-17, File exists\n");
    }

    #[tokio::test]
    async fn test_info_pool() {
        let f = fixture();
        get(&f.router, "/?Action=CreatePool&PoolName=ssd").await;

        let (status, _, body) = get(&f.router, "/?Action=InfoPool&PoolName=*").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.ends_with('\n'));
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json.as_object().unwrap().len(), 2);
        assert_eq!(json["rbd"]["Replica_num"], 0);

        let (status, _, body) = get(&f.router, "/?Action=InfoPoolIO&PoolName=rbd").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert!(json["rbd"].get("IO_read").is_some());

        let (status, _, body) = get(&f.router, "/?Action=InfoPool&PoolName=nvme").await;
        assert_eq!(status.as_u16(), 704);
        assert_eq!(body, "Not Found\n");
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let f = fixture();

        for uri in [
            "/",
            "/?Action=Nope",
            "/?Action=CreatePool",
            "/?Action=CreatePool&PoolName=",
            "/?Action=ModPoolRepSize&PoolName=rbd&Size=three",
            "/?Action=CreateDisk&PoolName=rbd&Size=1024",
            "/?Action=CreateDisk&PoolName=rbd&VolumeName=v&Size=lots",
        ] {
            let (status, _, body) = get(&f.router, uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(body, "Bad Request\n");
        }
        assert_eq!(f.cluster.handles().peak_contexts, 0);
    }

    #[tokio::test]
    async fn test_method_not_allowed() {
        let f = fixture();
        let (status, _, body) =
            call(&f.router, Method::POST, "/?Action=CreatePool&PoolName=ssd").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body, "Method Not Allowed\n");
        assert_eq!(f.cluster.pool_names(), vec!["rbd"]);
    }

    #[tokio::test]
    async fn test_stub_actions() {
        let f = fixture();
        for action in Action::ALL.iter().filter(|a| a.is_stub()) {
            let (status, _, _) = get(&f.router, &format!("/?Action={}", action.as_str())).await;
            assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        }
    }

    #[tokio::test]
    async fn test_mod_pool_rep_size() {
        let f = fixture();

        let (status, _, _) = get(&f.router, "/?Action=ModPoolRepSize&PoolName=rbd&Size=2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(f.cluster.pool_size("rbd"), Some(2));

        let (status, _, body) =
            get(&f.router, "/?Action=ModPoolRepSize&PoolName=rbd&Size=0").await;
        assert_eq!(status.as_u16(), 709);
        assert!(body.contains("pool size must be between 1 and 10"));
    }

    #[tokio::test]
    async fn test_create_disk_map_failure_header() {
        let f = fixture();
        f.mapper.set_failure(Some("rbd: sysfs write failed"));

        let (status, response, body) = get(
            &f.router,
            "/?Action=CreateDisk&PoolName=rbd&VolumeName=test1&Size=1073741824",
        )
        .await;
        assert_eq!(status.as_u16(), 716);
        assert_eq!(body, "Map Volume Failed\n");
        assert_eq!(
            response.headers().get(VOLUME_STATE_HEADER).unwrap(),
            "allocated"
        );
    }

    #[tokio::test]
    async fn test_volume_round_trip() {
        let f = fixture();

        let (status, _, _) = get(
            &f.router,
            "/?Action=CreateDisk&PoolName=rbd&VolumeName=test1&Size=1Gi",
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, _) = get(
            &f.router,
            "/?Action=ResizeVolume&PoolName=rbd&VolumeName=test1&Size=2Gi",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(f.cluster.image_size("rbd", "test1"), Some(2 << 30));

        let (status, _, _) = get(&f.router, "/?Action=DelVolume&PoolName=rbd&VolumeName=test1").await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, body) =
            get(&f.router, "/?Action=DelVolume&PoolName=rbd&VolumeName=test1").await;
        assert_eq!(status.as_u16(), 703);
        assert!(body.contains("No such file or directory"));

        let (_, _, body) = get(&f.router, "/?Action=InfoVolume&PoolName=rbd").await;
        assert_eq!(body, "{\"rbd\":[]}\n");
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let f = fixture();

        let (status, _, body) = get(&f.router, "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");

        get(&f.router, "/?Action=InfoPool&PoolName=rbd").await;
        get(&f.router, "/?Action=Nope").await;

        let (status, _, body) = get(&f.router, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(r#"ebs_requests_total{action="InfoPool",code="200"} 1"#));
        assert!(body.contains(r#"ebs_requests_total{action="unknown",code="400"} 1"#));
    }
}
