//! API Metrics
//!
//! Request counters and latency histograms, registered on a registry owned by
//! the API state rather than the process-wide default.

use crate::error::{Error, Result};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Duration;

/// Metrics recorded per `Action`
#[derive(Clone)]
pub struct ApiMetrics {
    registry: Registry,
    requests: IntCounterVec,
    duration: HistogramVec,
}

impl ApiMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("ebs_requests_total", "Requests handled, by action and status code"),
            &["action", "code"],
        )
        .map_err(metrics_error)?;

        let duration = HistogramVec::new(
            HistogramOpts::new(
                "ebs_request_duration_seconds",
                "Time spent handling a request, by action",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["action"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(requests.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(duration.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            requests,
            duration,
        })
    }

    /// Record one handled request
    pub fn observe(&self, action: &str, code: u16, elapsed: Duration) {
        self.requests
            .with_label_values(&[action, &code.to_string()])
            .inc();
        self.duration
            .with_label_values(&[action])
            .observe(elapsed.as_secs_f64());
    }

    /// Requests counted so far for one action and code
    pub fn request_count(&self, action: &str, code: u16) -> u64 {
        self.requests
            .with_label_values(&[action, &code.to_string()])
            .get()
    }

    /// Text exposition of every metric
    pub fn render(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_and_render() {
        let metrics = ApiMetrics::new().unwrap();
        metrics.observe("CreatePool", 200, Duration::from_millis(3));
        metrics.observe("CreatePool", 705, Duration::from_millis(4));
        metrics.observe("CreatePool", 200, Duration::from_millis(5));

        assert_eq!(metrics.request_count("CreatePool", 200), 2);
        assert_eq!(metrics.request_count("CreatePool", 705), 1);

        let (content_type, body) = metrics.render().unwrap();
        let text = String::from_utf8(body).unwrap();
        assert!(content_type.starts_with("text/plain"));
        assert!(text.contains(r#"ebs_requests_total{action="CreatePool",code="705"} 1"#));
        assert!(text.contains("ebs_request_duration_seconds_count{action=\"CreatePool\"} 3"));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = ApiMetrics::new().unwrap();
        let b = ApiMetrics::new().unwrap();
        a.observe("InfoPool", 200, Duration::ZERO);
        assert_eq!(b.request_count("InfoPool", 200), 0);
    }
}
