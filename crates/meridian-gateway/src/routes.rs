//! Route table: maps `(method, path)` to an upstream or a built-in handler.
//!
//! Built once from [`GatewayConfig`] at startup and shared read-only by all
//! request handlers. Built-in routes live in the same tree so that a
//! configured route colliding with `/health` fails at startup like any other
//! conflict.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use http::Method;
use meridian_router::{Params, Router};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::config::{parse_upstream_url, GatewayConfig};
use crate::error::{GatewayError, GatewayResult};

/// Per-route authentication policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// A valid token is mandatory.
    Required,
    /// A valid token is used if present; otherwise the request is anonymous.
    Optional,
    /// The token is never inspected.
    None,
}

impl AuthMode {
    /// Lowercase name, used as a metric label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Optional => "optional",
            Self::None => "none",
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named upstream service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    /// Name from the `[upstreams]` table.
    pub name: String,
    /// Base URL; its path prefix is kept when forwarding.
    pub base_url: Url,
}

/// Handlers answered by the gateway itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// `GET /`
    Banner,
    /// `GET /health`
    Health,
    /// `GET /ready`
    Ready,
    /// `GET /metrics`
    Metrics,
}

/// Where a matched request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Forward to an upstream.
    Upstream(Arc<UpstreamTarget>),
    /// Answer locally.
    Builtin(Builtin),
}

/// One entry of the route table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    /// HTTP method.
    pub method: Method,
    /// Pattern as configured, e.g. `/reviews/:id`.
    pub pattern: String,
    /// Destination.
    pub target: Target,
    /// Authentication policy.
    pub auth: AuthMode,
    label: String,
}

impl RouteEntry {
    fn new(method: Method, pattern: &str, target: Target, auth: AuthMode) -> Self {
        let label = format!("{method} {pattern}");
        Self {
            method,
            pattern: pattern.to_string(),
            target,
            auth,
            label,
        }
    }

    /// `METHOD /pattern`, used as the metrics `route` label.
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// A resolved route with its path parameters.
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    /// The matched entry.
    pub entry: Arc<RouteEntry>,
    /// Captured path parameters.
    pub params: Params,
}

/// Immutable route table.
#[derive(Debug, Clone)]
pub struct RouteTable {
    router: Router<Arc<RouteEntry>>,
    upstreams: Vec<Arc<UpstreamTarget>>,
}

impl RouteTable {
    /// Build the table from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error on unparseable upstream URLs, unknown upstream names,
    /// invalid methods and conflicting routes.
    pub fn from_config(config: &GatewayConfig) -> GatewayResult<Self> {
        let mut upstreams = BTreeMap::new();
        for (name, url) in &config.upstreams {
            let target = UpstreamTarget {
                name: name.clone(),
                base_url: parse_upstream_url(name, url)?,
            };
            upstreams.insert(name.as_str(), Arc::new(target));
        }

        let mut table = Self {
            router: Router::new(),
            upstreams: upstreams.values().cloned().collect(),
        };

        table.add(Method::GET, "/", Target::Builtin(Builtin::Banner), AuthMode::None)?;
        table.add(Method::GET, "/health", Target::Builtin(Builtin::Health), AuthMode::None)?;
        table.add(Method::GET, "/ready", Target::Builtin(Builtin::Ready), AuthMode::None)?;
        if config.telemetry.metrics.enabled {
            table.add(Method::GET, "/metrics", Target::Builtin(Builtin::Metrics), AuthMode::None)?;
        }

        for spec in config.effective_routes() {
            let method = spec.http_method()?;
            let upstream = upstreams.get(spec.upstream.as_str()).ok_or_else(|| {
                GatewayError::config(format!(
                    "route {} {}: unknown upstream `{}`",
                    spec.method, spec.path, spec.upstream
                ))
            })?;
            table.add(method, &spec.path, Target::Upstream(Arc::clone(upstream)), spec.auth)?;
        }

        Ok(table)
    }

    fn add(
        &mut self,
        method: Method,
        pattern: &str,
        target: Target,
        auth: AuthMode,
    ) -> GatewayResult<()> {
        let entry = RouteEntry::new(method.clone(), pattern, target, auth);
        self.router.route(&method, pattern, Arc::new(entry))?;
        Ok(())
    }

    /// Resolve a request to a route entry.
    pub fn resolve(&self, method: &Method, path: &str) -> Option<ResolvedRoute> {
        let matched = self.router.match_route(method, path)?;
        Some(ResolvedRoute {
            entry: Arc::clone(matched.value),
            params: matched.params,
        })
    }

    /// Upstreams known to the table, sorted by name.
    pub fn upstreams(&self) -> &[Arc<UpstreamTarget>] {
        &self.upstreams
    }

    /// Number of registered `(method, pattern)` pairs, built-ins included.
    pub fn len(&self) -> usize {
        self.router.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.router.is_empty()
    }
}
