//! Prometheus metrics for the gateway.
//!
//! The recorder is installed in-process and rendered by the gateway's own
//! `GET /metrics` route; no separate listener is opened.
//!
//! # Metrics
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `gateway_requests_total` | Counter | `route`, `status` |
//! | `gateway_request_duration_seconds` | Histogram | `route` |
//! | `gateway_auth_failures_total` | Counter | `reason`, `mode` |
//! | `gateway_upstream_errors_total` | Counter | `upstream`, `kind` |
//! | `gateway_in_flight_requests` | Gauge | - |

use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use serde::{Deserialize, Serialize};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Request counter.
pub const REQUESTS_TOTAL: &str = "gateway_requests_total";
/// Request latency histogram.
pub const REQUEST_DURATION_SECONDS: &str = "gateway_request_duration_seconds";
/// Token verification failure counter.
pub const AUTH_FAILURES_TOTAL: &str = "gateway_auth_failures_total";
/// Upstream failure counter.
pub const UPSTREAM_ERRORS_TOTAL: &str = "gateway_upstream_errors_total";
/// In-flight request gauge.
pub const IN_FLIGHT_REQUESTS: &str = "gateway_in_flight_requests";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static INSTALL_LOCK: Mutex<()> = Mutex::new(());

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether metrics are recorded and exposed.
    pub enabled: bool,

    /// Histogram buckets for request duration, in seconds.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            duration_buckets: vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
            ],
        }
    }
}

/// Handle used to render the installed recorder.
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    handle: PrometheusHandle,
}

impl MetricsRegistry {
    /// Creates a registry around an existing handle.
    #[must_use]
    pub fn new(handle: PrometheusHandle) -> Self {
        Self { handle }
    }

    /// Renders all metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.run_upkeep();
        self.handle.render()
    }
}

/// Builds a recorder with the gateway's histogram buckets, without installing it.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidConfig` if the bucket list is empty.
pub fn build_recorder(config: &MetricsConfig) -> TelemetryResult<PrometheusRecorder> {
    let recorder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(REQUEST_DURATION_SECONDS.to_string()),
            &config.duration_buckets,
        )
        .map_err(|e| TelemetryError::InvalidConfig(format!("duration buckets: {e}")))?
        .build_recorder();
    Ok(recorder)
}

/// Installs the global recorder and returns a handle for rendering.
///
/// Repeated calls return the handle of the recorder installed first. Returns
/// `None` when metrics are disabled.
///
/// # Errors
///
/// Returns `TelemetryError::MetricsInit` if another recorder was installed
/// outside this crate.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<Option<MetricsRegistry>> {
    if !config.enabled {
        return Ok(None);
    }

    let _guard = INSTALL_LOCK
        .lock()
        .map_err(|_| TelemetryError::MetricsInit("install lock poisoned".to_string()))?;

    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(Some(MetricsRegistry::new(handle.clone())));
    }

    let recorder = build_recorder(config)?;
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    register_metric_descriptions();

    let handle = METRICS_HANDLE.get_or_init(|| handle);
    Ok(Some(MetricsRegistry::new(handle.clone())))
}

fn register_metric_descriptions() {
    describe_counter!(REQUESTS_TOTAL, "Total number of requests handled by the gateway");
    describe_histogram!(
        REQUEST_DURATION_SECONDS,
        "Time from request receipt to response headers, in seconds"
    );
    describe_counter!(AUTH_FAILURES_TOTAL, "Bearer token verification failures");
    describe_counter!(
        UPSTREAM_ERRORS_TOTAL,
        "Upstream exchanges that failed without a response"
    );
    describe_gauge!(IN_FLIGHT_REQUESTS, "Requests currently being handled");
}

/// Records a completed request.
///
/// `route` is the matched route pattern (e.g. `GET /reviews/:id`), never the
/// concrete path, so label cardinality stays bounded.
pub fn record_request(route: &str, status_code: u16, duration: Duration) {
    counter!(
        REQUESTS_TOTAL,
        "route" => route.to_string(),
        "status" => status_code.to_string()
    )
    .increment(1);

    histogram!(REQUEST_DURATION_SECONDS, "route" => route.to_string())
        .record(duration.as_secs_f64());
}

/// Records a token verification failure.
pub fn record_auth_failure(reason: &'static str, mode: &'static str) {
    counter!(AUTH_FAILURES_TOTAL, "reason" => reason, "mode" => mode).increment(1);
}

/// Records a failed upstream exchange (`kind` is `unreachable` or `timeout`).
pub fn record_upstream_error(upstream: &str, kind: &'static str) {
    counter!(UPSTREAM_ERRORS_TOTAL, "upstream" => upstream.to_string(), "kind" => kind)
        .increment(1);
}

/// Guard that decrements the in-flight gauge on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    _private: (),
}

impl InFlightGuard {
    /// Creates a new guard and increments the in-flight gauge.
    #[must_use]
    pub fn new() -> Self {
        gauge!(IN_FLIGHT_REQUESTS).increment(1.0);
        Self { _private: () }
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!(IN_FLIGHT_REQUESTS).decrement(1.0);
    }
}
