//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define the per-request latency observation
//! - Forward observations to a pluggable sink
//! - Expose a Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `<namespace>_handler_request_milliseconds` (histogram): handler latency,
//!   labelled by `handler` (route pattern), `method` and `httpcode`
//! - `circuitbreaker_transitions_total` (counter): breaker transitions by
//!   `from` and `to` state
//!
//! # Design Decisions
//! - The exporter renders bucketless histograms as summaries
//! - Failing to install the exporter is reported once and never fatal

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{Method, StatusCode};
use metrics::{describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// One latency observation for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Route pattern as registered, not the resolved path.
    pub pattern: Arc<str>,
    pub method: Method,
    pub status: StatusCode,
    pub latency_ms: f64,
}

/// Destination for request observations.
pub trait MetricsSink: Send + Sync + 'static {
    fn observe(&self, observation: &Observation);
}

/// Sink that drops every observation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn observe(&self, _observation: &Observation) {}
}

/// Sink recording into the global `metrics` recorder.
#[derive(Debug, Clone)]
pub struct PrometheusSink {
    metric: String,
}

impl PrometheusSink {
    /// Create a sink whose histogram name is prefixed with `namespace`.
    pub fn new(namespace: &str) -> Self {
        let metric = if namespace.is_empty() {
            "handler_request_milliseconds".to_string()
        } else {
            format!("{namespace}_handler_request_milliseconds")
        };
        describe_histogram!(
            metric.clone(),
            Unit::Milliseconds,
            "Handler response time in milliseconds"
        );
        Self { metric }
    }

    pub fn metric_name(&self) -> &str {
        &self.metric
    }
}

impl MetricsSink for PrometheusSink {
    fn observe(&self, observation: &Observation) {
        histogram!(
            self.metric.clone(),
            "handler" => observation.pattern.to_string(),
            "method" => observation.method.to_string(),
            "httpcode" => observation.status.as_u16().to_string()
        )
        .record(observation.latency_ms);
    }
}

/// Errors raised while setting up the exporter.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to install prometheus exporter: {0}")]
    Install(#[from] BuildError),
}

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), MetricsError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}
