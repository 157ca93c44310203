//! Configuration for the gateway.
//!
//! Sources, in order of precedence (last wins):
//!
//! 1. built-in defaults (the reference deployment's four upstreams and route table)
//! 2. an optional TOML or JSON file passed with `--config`
//! 3. environment variables
//!
//! [`GatewayConfig::validate`] runs after all sources are merged. Route
//! conflicts are detected separately when the route table is built.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use http::Method;
use meridian_telemetry::{LogFormat, TelemetryConfig};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};
use crate::routes::AuthMode;

/// Signing secret used when `JWT_SECRET` is not set. Not for production.
pub const DEFAULT_JWT_SECRET: &str = "your-super-secret-jwt-key";

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener and forwarding settings.
    pub server: ServerSettings,
    /// Token verification settings.
    pub auth: AuthSettings,
    /// Upstream name to base URL.
    pub upstreams: BTreeMap<String, String>,
    /// Route table. Empty means the default table.
    pub routes: Vec<RouteSpec>,
    /// Logging and metrics.
    pub telemetry: TelemetryConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            auth: AuthSettings::default(),
            upstreams: default_upstreams(),
            routes: Vec::new(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Create a new configuration builder.
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }

    /// Load configuration from a file.
    pub fn from_file(path: impl Into<PathBuf>) -> GatewayResult<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            GatewayError::config(format!("failed to read {}: {e}", path.display()))
        })?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        match extension {
            "toml" => toml::from_str(&content)
                .map_err(|e| GatewayError::config(format!("invalid TOML: {e}"))),
            "json" => serde_json::from_str(&content)
                .map_err(|e| GatewayError::config(format!("invalid JSON: {e}"))),
            _ => Err(GatewayError::config(format!(
                "unsupported config format: {extension}"
            ))),
        }
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(self) -> GatewayResult<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// Values that are set but unparseable are errors, not silently ignored.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> GatewayResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup("JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Some(issuer) = lookup("JWT_ISSUER") {
            self.auth.issuer = Some(issuer).filter(|s| !s.is_empty());
        }

        for (var, name) in [
            ("AUTH_SERVICE_URL", "auth"),
            ("BUSINESS_SERVICE_URL", "business"),
            ("REVIEW_SERVICE_URL", "review"),
            ("LOGGING_SERVICE_URL", "logging"),
        ] {
            if let Some(url) = lookup(var) {
                self.upstreams.insert(name.to_string(), url);
            }
        }

        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| GatewayError::config(format!("PORT: invalid port `{port}`")))?;
        }
        if let Some(addr) = lookup("GATEWAY_LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }
        if let Some(timeout) = lookup("GATEWAY_UPSTREAM_TIMEOUT") {
            self.server.upstream_timeout = duration_format::parse_duration(&timeout)
                .map_err(|e| GatewayError::config(format!("GATEWAY_UPSTREAM_TIMEOUT: {e}")))?;
        }
        if let Some(timeout) = lookup("GATEWAY_CONNECT_TIMEOUT") {
            self.server.connect_timeout = duration_format::parse_duration(&timeout)
                .map_err(|e| GatewayError::config(format!("GATEWAY_CONNECT_TIMEOUT: {e}")))?;
        }
        if let Some(size) = lookup("GATEWAY_MAX_BODY_SIZE") {
            self.server.max_request_body_size = size.trim().parse().map_err(|_| {
                GatewayError::config(format!("GATEWAY_MAX_BODY_SIZE: invalid size `{size}`"))
            })?;
        }
        if let Some(level) = lookup("GATEWAY_LOG_LEVEL") {
            self.telemetry.log.level = level;
        }
        if let Some(format) = lookup("GATEWAY_LOG_FORMAT") {
            self.telemetry.log.format = format
                .parse::<LogFormat>()
                .map_err(|e| GatewayError::config(format!("GATEWAY_LOG_FORMAT: {e}")))?;
        }

        Ok(self)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.auth.jwt_secret.is_empty() {
            return Err(GatewayError::config("auth.jwt_secret must not be empty"));
        }
        if self.server.upstream_timeout.is_zero() {
            return Err(GatewayError::config("server.upstream_timeout must be positive"));
        }
        if self.server.connect_timeout.is_zero() {
            return Err(GatewayError::config("server.connect_timeout must be positive"));
        }
        if self.server.max_request_body_size == 0 {
            return Err(GatewayError::config(
                "server.max_request_body_size must be positive",
            ));
        }
        self.server.socket_addr()?;

        for (name, url) in &self.upstreams {
            parse_upstream_url(name, url)?;
        }

        for route in self.effective_routes() {
            route.http_method()?;
            if !route.path.starts_with('/') {
                return Err(GatewayError::config(format!(
                    "route {} {}: path must start with '/'",
                    route.method, route.path
                )));
            }
            if !self.upstreams.contains_key(&route.upstream) {
                return Err(GatewayError::config(format!(
                    "route {} {}: unknown upstream `{}`",
                    route.method, route.path, route.upstream
                )));
            }
        }

        Ok(())
    }

    /// Configured routes, or the default table when none are configured.
    pub fn effective_routes(&self) -> Vec<RouteSpec> {
        if self.routes.is_empty() {
            default_routes()
        } else {
            self.routes.clone()
        }
    }

    /// Whether the well-known development secret is in effect.
    pub fn uses_default_secret(&self) -> bool {
        self.auth.jwt_secret == DEFAULT_JWT_SECRET
    }
}

/// Listener and forwarding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind to.
    pub listen_addr: String,
    /// Port to listen on.
    pub port: u16,
    /// Bound on one upstream exchange, from connect to the last body byte.
    #[serde(with = "duration_format")]
    pub upstream_timeout: Duration,
    /// Bound on establishing an upstream TCP connection.
    #[serde(with = "duration_format")]
    pub connect_timeout: Duration,
    /// Maximum accepted request body in bytes.
    pub max_request_body_size: usize,
    /// Idle pooled connections kept per upstream host.
    pub pool_max_idle_per_host: usize,
    /// Whether `/ready` probes each upstream's `/health`.
    pub probe_upstreams: bool,
    /// How long shutdown waits for in-flight connections.
    #[serde(with = "duration_format")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            port: 8080,
            upstream_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            max_request_body_size: 10 * 1024 * 1024,
            pool_max_idle_per_host: 32,
            probe_upstreams: false,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerSettings {
    /// Resolve the listen socket address.
    pub fn socket_addr(&self) -> GatewayResult<SocketAddr> {
        let ip: IpAddr = self.listen_addr.parse().map_err(|e| {
            GatewayError::config(format!("invalid listen address `{}`: {e}", self.listen_addr))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Token verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Shared HMAC secret.
    pub jwt_secret: String,
    /// Expected `iss` claim, if any.
    pub issuer: Option<String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            issuer: None,
        }
    }
}

/// One configured route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSpec {
    /// HTTP method.
    pub method: String,
    /// Path pattern with `:name` parameters.
    pub path: String,
    /// Name of an entry in `upstreams`.
    pub upstream: String,
    /// Authentication mode. Has no default: every route states its policy.
    pub auth: AuthMode,
}

impl RouteSpec {
    /// Create a route spec.
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        upstream: impl Into<String>,
        auth: AuthMode,
    ) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            upstream: upstream.into(),
            auth,
        }
    }

    /// The route's method, case-normalised to uppercase.
    ///
    /// Request methods are matched exactly, so `get` in a config file would
    /// otherwise register an extension method that no client sends.
    pub fn http_method(&self) -> GatewayResult<Method> {
        Method::from_bytes(self.method.to_ascii_uppercase().as_bytes()).map_err(|_| {
            GatewayError::config(format!("route {} {}: invalid method", self.method, self.path))
        })
    }
}

/// The reference deployment's upstreams.
pub fn default_upstreams() -> BTreeMap<String, String> {
    [
        ("auth", "http://auth-service:8084"),
        ("business", "http://business-service:8081"),
        ("review", "http://review-service:8082"),
        ("logging", "http://logging-service:8083"),
    ]
    .into_iter()
    .map(|(name, url)| (name.to_string(), url.to_string()))
    .collect()
}

/// The reference deployment's route table.
pub fn default_routes() -> Vec<RouteSpec> {
    use AuthMode::{None, Optional, Required};

    [
        ("POST", "/auth/register", "auth", None),
        ("POST", "/auth/login", "auth", None),
        ("POST", "/auth/logout", "auth", None),
        ("GET", "/auth/me", "auth", Required),
        ("GET", "/businesses", "business", None),
        ("GET", "/businesses/:id", "business", None),
        ("GET", "/businesses/:id/reviews", "review", Optional),
        ("POST", "/businesses/:id/reviews", "review", Required),
        ("GET", "/reviews", "review", Required),
        ("GET", "/reviews/:id", "review", Required),
        ("POST", "/logs/review-view", "logging", Required),
        ("GET", "/logs/user/:user_id/history", "logging", Required),
        ("GET", "/logs/business/:business_id/stats", "logging", Required),
    ]
    .into_iter()
    .map(|(method, path, upstream, auth)| RouteSpec::new(method, path, upstream, auth))
    .collect()
}

/// Parse and check an upstream base URL.
pub fn parse_upstream_url(name: &str, url: &str) -> GatewayResult<Url> {
    let parsed = Url::parse(url)
        .map_err(|e| GatewayError::config(format!("upstream `{name}`: invalid URL `{url}`: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(GatewayError::config(format!(
            "upstream `{name}`: URL must start with http:// or https://"
        )));
    }
    if parsed.host_str().is_none() {
        return Err(GatewayError::config(format!(
            "upstream `{name}`: URL has no host"
        )));
    }
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(GatewayError::config(format!(
            "upstream `{name}`: URL must not carry a query or fragment"
        )));
    }
    Ok(parsed)
}

/// Builder for `GatewayConfig`.
#[derive(Debug, Default)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    /// Set the listen address.
    #[must_use]
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.server.listen_addr = addr.into();
        self
    }

    /// Set the listen port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    /// Set the shared signing secret.
    #[must_use]
    pub fn jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.auth.jwt_secret = secret.into();
        self
    }

    /// Pin the expected issuer.
    #[must_use]
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.config.auth.issuer = Some(issuer.into());
        self
    }

    /// Add or replace an upstream.
    #[must_use]
    pub fn upstream(mut self, name: impl Into<String>, url: impl Into<String>) -> Self {
        self.config.upstreams.insert(name.into(), url.into());
        self
    }

    /// Add a route. Adding any route replaces the default table.
    #[must_use]
    pub fn route(
        mut self,
        method: impl Into<String>,
        path: impl Into<String>,
        upstream: impl Into<String>,
        auth: AuthMode,
    ) -> Self {
        self.config
            .routes
            .push(RouteSpec::new(method, path, upstream, auth));
        self
    }

    /// Set the upstream timeout.
    #[must_use]
    pub fn upstream_timeout(mut self, timeout: Duration) -> Self {
        self.config.server.upstream_timeout = timeout;
        self
    }

    /// Set the upstream connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.server.connect_timeout = timeout;
        self
    }

    /// Set the maximum request body size.
    #[must_use]
    pub fn max_request_body_size(mut self, size: usize) -> Self {
        self.config.server.max_request_body_size = size;
        self
    }

    /// Enable upstream probing on `/ready`.
    #[must_use]
    pub fn probe_upstreams(mut self, enabled: bool) -> Self {
        self.config.server.probe_upstreams = enabled;
        self
    }

    /// Enable or disable metrics.
    #[must_use]
    pub fn metrics(mut self, enabled: bool) -> Self {
        self.config.telemetry.metrics.enabled = enabled;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> GatewayResult<GatewayConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Serde adapter for durations written as `"30s"`, `"500ms"`, `"1m 30s"` or bare seconds.
pub(crate) mod duration_format {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Ok(secs) = s.parse::<u64>() {
            return Ok(Duration::from_secs(secs));
        }
        humantime::parse_duration(s).map_err(|e| format!("invalid duration `{s}`: {e}"))
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(s) => parse_duration(&s).map_err(serde::de::Error::custom),
        }
    }
}
