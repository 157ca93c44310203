//! Liveness and readiness.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};

use crate::proxy::outbound_url;
use crate::routes::UpstreamTarget;

/// Liveness status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// The process is serving.
    Healthy,
}

/// Readiness status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessStatus {
    /// Accepting traffic.
    Ready,
    /// Not bound yet, shutting down, or an upstream probe failed.
    NotReady,
}

impl ReadinessStatus {
    /// Check if the gateway is ready.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `healthy` while the process answers.
    pub status: HealthStatus,
}

/// Body of `GET /ready`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    /// Overall readiness.
    pub status: ReadinessStatus,
    /// Upstream probe results, when probing is enabled.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<CheckResult>,
}

/// Result of a single upstream probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    /// Upstream name.
    pub name: String,
    /// Whether the probe passed.
    pub passed: bool,
    /// Optional message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Probe time in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl CheckResult {
    /// Create a passing check result.
    pub fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: None,
            duration_ms: None,
        }
    }

    /// Create a failing check result.
    pub fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: Some(message.into()),
            duration_ms: None,
        }
    }

    /// Set the duration.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = Some(duration.as_millis() as u64);
        self
    }
}

/// Tracks readiness and probes upstreams.
#[derive(Debug)]
pub struct HealthChecker {
    ready: AtomicBool,
    probe: Option<UpstreamProbe>,
}

#[derive(Debug)]
struct UpstreamProbe {
    client: reqwest::Client,
    upstreams: Vec<Arc<UpstreamTarget>>,
    timeout: Duration,
}

impl HealthChecker {
    /// Create a checker that only tracks the ready flag.
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            probe: None,
        }
    }

    /// Also probe each upstream's `/health` on every readiness check.
    #[must_use]
    pub fn with_upstream_probes(
        mut self,
        client: reqwest::Client,
        upstreams: Vec<Arc<UpstreamTarget>>,
        timeout: Duration,
    ) -> Self {
        self.probe = Some(UpstreamProbe {
            client,
            upstreams,
            timeout,
        });
        self
    }

    /// Mark the gateway as ready or not.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Check the ready flag.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Liveness answer.
    pub fn liveness(&self) -> HealthResponse {
        HealthResponse {
            status: HealthStatus::Healthy,
        }
    }

    /// Readiness answer. Upstreams are probed concurrently, and only while
    /// the ready flag is set.
    pub async fn readiness(&self) -> ReadinessResponse {
        if !self.is_ready() {
            return ReadinessResponse {
                status: ReadinessStatus::NotReady,
                checks: Vec::new(),
            };
        }

        let checks = match &self.probe {
            Some(probe) => join_all(probe.upstreams.iter().map(|u| probe.check(u))).await,
            None => Vec::new(),
        };

        let status = if checks.iter().all(|c| c.passed) {
            ReadinessStatus::Ready
        } else {
            ReadinessStatus::NotReady
        };

        ReadinessResponse { status, checks }
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl UpstreamProbe {
    async fn check(&self, upstream: &UpstreamTarget) -> CheckResult {
        let start = Instant::now();
        let url = outbound_url(&upstream.base_url, "/health");

        match self.client.get(url).timeout(self.timeout).send().await {
            Ok(resp) if resp.status().is_success() => {
                CheckResult::pass(&upstream.name).with_duration(start.elapsed())
            }
            Ok(resp) => CheckResult::fail(&upstream.name, format!("status {}", resp.status()))
                .with_duration(start.elapsed()),
            Err(e) if e.is_timeout() => {
                CheckResult::fail(&upstream.name, "timeout").with_duration(start.elapsed())
            }
            Err(_) => CheckResult::fail(&upstream.name, "unreachable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_result() {
        let pass = CheckResult::pass("review");
        assert!(pass.passed);
        assert_eq!(pass.name, "review");

        let fail = CheckResult::fail("review", "timeout");
        assert!(!fail.passed);
        assert_eq!(fail.message.as_deref(), Some("timeout"));

        let timed = CheckResult::pass("review").with_duration(Duration::from_millis(100));
        assert_eq!(timed.duration_ms, Some(100));
    }

    #[test]
    fn test_liveness_body() {
        let body = serde_json::to_string(&HealthChecker::new().liveness()).unwrap();
        assert_eq!(body, r#"{"status":"healthy"}"#);
    }

    #[tokio::test]
    async fn test_readiness_follows_flag() {
        let checker = HealthChecker::new();

        let response = checker.readiness().await;
        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            r#"{"status":"not_ready"}"#
        );

        checker.set_ready(true);
        let response = checker.readiness().await;
        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            r#"{"status":"ready"}"#
        );

        checker.set_ready(false);
        assert!(!checker.readiness().await.status.is_ready());
    }

    #[tokio::test]
    async fn test_failed_probe_makes_not_ready() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let upstream = Arc::new(UpstreamTarget {
            name: "logging".to_string(),
            base_url: reqwest::Url::parse(&format!("http://{addr}")).unwrap(),
        });
        let checker = HealthChecker::new().with_upstream_probes(
            reqwest::Client::new(),
            vec![upstream],
            Duration::from_secs(1),
        );
        checker.set_ready(true);

        let response = checker.readiness().await;
        assert_eq!(response.status, ReadinessStatus::NotReady);
        assert_eq!(response.checks.len(), 1);
        assert_eq!(response.checks[0].name, "logging");
        assert!(!response.checks[0].passed);
    }
}
