//! Per-request dispatch.
//!
//! ```text
//! Received ──resolve──▶ Matched ──authorize──▶ Forwarded ──▶ Completed
//!     │                    │                       │
//!     └── 404              └── 401 (required)      └── 502 / 504
//! ```
//!
//! Optional routes never fail at the auth step: a bad token degrades to an
//! anonymous request. Routes with auth `none` never reach the verifier.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, WWW_AUTHENTICATE};
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use meridian_telemetry::metrics::{record_auth_failure, record_request};
use meridian_telemetry::{InFlightGuard, MetricsRegistry};
use serde::Serialize;
use tracing::Instrument;

use crate::auth::{extract_bearer, HmacTokenVerifier, IdentityClaim, TokenVerifier, VerificationFailure};
use crate::config::GatewayConfig;
use crate::error::{ErrorResponse, GatewayError, GatewayResult};
use crate::headers::{append_forwarded_for, request_id, HEADER_REQUEST_ID};
use crate::health::HealthChecker;
use crate::identity::propagate_identity;
use crate::proxy::{BoxError, Forwarder, GatewayBody, ProxyRequest};
use crate::routes::{AuthMode, Builtin, RouteEntry, RouteTable, Target, UpstreamTarget};

/// Outcome of the auth step for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    /// A valid token was presented.
    Authenticated(IdentityClaim),
    /// Optional route without a usable token.
    Anonymous,
    /// Route does not inspect tokens.
    Skipped,
}

impl AuthDecision {
    /// The claim to propagate, if any.
    pub fn claim(&self) -> Option<&IdentityClaim> {
        match self {
            Self::Authenticated(claim) => Some(claim),
            Self::Anonymous | Self::Skipped => None,
        }
    }
}

/// The gateway request handler. Cheap to clone; all state is immutable
/// after construction except the readiness flag.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

struct Inner {
    routes: RouteTable,
    verifier: Arc<dyn TokenVerifier>,
    forwarder: Forwarder,
    health: HealthChecker,
    metrics: Option<MetricsRegistry>,
    max_body_size: usize,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("routes", &self.inner.routes.len())
            .field("max_body_size", &self.inner.max_body_size)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Create a builder from validated configuration.
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder {
            config,
            verifier: None,
            metrics: None,
        }
    }

    /// Build a gateway with the HS256 verifier from `config`.
    pub fn from_config(config: GatewayConfig) -> GatewayResult<Self> {
        Self::builder(config).build()
    }

    /// The route table.
    pub fn routes(&self) -> &RouteTable {
        &self.inner.routes
    }

    /// Readiness state.
    pub fn health(&self) -> &HealthChecker {
        &self.inner.health
    }

    /// Run the auth step for a route's mode.
    ///
    /// Only `Required` can fail. Failures on optional routes are logged and
    /// counted, then reported as [`AuthDecision::Anonymous`]; a missing header
    /// there is not a failure.
    pub fn authorize(
        &self,
        mode: AuthMode,
        headers: &HeaderMap,
    ) -> Result<AuthDecision, VerificationFailure> {
        match mode {
            AuthMode::None => Ok(AuthDecision::Skipped),
            AuthMode::Required => match self.verify_headers(headers) {
                Ok(claim) => Ok(AuthDecision::Authenticated(claim)),
                Err(reason) => {
                    record_auth_failure(reason.code(), mode.as_str());
                    Err(reason)
                }
            },
            AuthMode::Optional => match self.verify_headers(headers) {
                Ok(claim) => Ok(AuthDecision::Authenticated(claim)),
                Err(VerificationFailure::MissingHeader) => Ok(AuthDecision::Anonymous),
                Err(reason) => {
                    tracing::debug!(reason = reason.code(), "Optional auth failed, continuing anonymously");
                    record_auth_failure(reason.code(), mode.as_str());
                    Ok(AuthDecision::Anonymous)
                }
            },
        }
    }

    fn verify_headers(&self, headers: &HeaderMap) -> Result<IdentityClaim, VerificationFailure> {
        let token = extract_bearer(headers)?;
        self.inner.verifier.verify(token)
    }

    /// Handle one request from `peer`. Never fails: every error becomes a
    /// JSON error response.
    pub async fn dispatch<B>(&self, req: Request<B>, peer: SocketAddr) -> Response<GatewayBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let start = Instant::now();
        let _in_flight = InFlightGuard::new();
        let request_id = request_id(req.headers());
        let span = tracing::info_span!(
            "request",
            request_id = %request_id,
            method = %req.method(),
            path = %req.uri().path(),
            peer = %peer,
        );

        async move {
            let resolved = self.inner.routes.resolve(req.method(), req.uri().path());

            let result = match &resolved {
                Some(route) => self.handle(&route.entry, req, peer, &request_id).await,
                None => Err(GatewayError::RouteNotFound {
                    method: req.method().to_string(),
                    path: req.uri().path().to_string(),
                }),
            };

            let mut response = result.unwrap_or_else(|err| error_response(&err));

            if !response.headers().contains_key(&HEADER_REQUEST_ID) {
                if let Ok(value) = HeaderValue::from_str(&request_id) {
                    response.headers_mut().insert(HEADER_REQUEST_ID.clone(), value);
                }
            }

            let status = response.status().as_u16();
            let elapsed = start.elapsed();
            let label = resolved.as_ref().map_or("unmatched", |r| r.entry.label());
            record_request(label, status, elapsed);
            tracing::info!(
                route = label,
                status,
                duration_ms = elapsed.as_secs_f64() * 1000.0,
                "Request completed"
            );

            response
        }
        .instrument(span)
        .await
    }

    async fn handle<B>(
        &self,
        entry: &RouteEntry,
        req: Request<B>,
        peer: SocketAddr,
        request_id: &str,
    ) -> GatewayResult<Response<GatewayBody>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let decision = self.authorize(entry.auth, req.headers())?;

        match &entry.target {
            Target::Builtin(builtin) => Ok(self.builtin(*builtin).await),
            Target::Upstream(upstream) => {
                self.forward(upstream, req, peer, request_id, decision.claim())
                    .await
            }
        }
    }

    async fn forward<B>(
        &self,
        upstream: &UpstreamTarget,
        req: Request<B>,
        peer: SocketAddr,
        request_id: &str,
        claim: Option<&IdentityClaim>,
    ) -> GatewayResult<Response<GatewayBody>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();
        let body = read_body(&parts.headers, body, self.inner.max_body_size).await?;

        let path_and_query = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
        let mut request = ProxyRequest::new(parts.method.clone(), path_and_query, &parts.headers, body);

        append_forwarded_for(&mut request.headers, peer.ip());
        if let Ok(value) = HeaderValue::from_str(request_id) {
            request.headers.insert(HEADER_REQUEST_ID.clone(), value);
        }
        propagate_identity(&mut request.headers, claim);

        tracing::debug!(
            upstream = %upstream.name,
            authenticated = claim.is_some(),
            "Forwarding request"
        );
        self.inner.forwarder.forward(upstream, request).await
    }

    async fn builtin(&self, builtin: Builtin) -> Response<GatewayBody> {
        match builtin {
            Builtin::Banner => json_response(
                StatusCode::OK,
                &serde_json::json!({ "message": "API Gateway is running!" }),
            ),
            Builtin::Health => json_response(StatusCode::OK, &self.inner.health.liveness()),
            Builtin::Ready => {
                let readiness = self.inner.health.readiness().await;
                let status = if readiness.status.is_ready() {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                json_response(status, &readiness)
            }
            Builtin::Metrics => match &self.inner.metrics {
                Some(registry) => {
                    let mut response = Response::new(full(registry.render()));
                    response.headers_mut().insert(
                        CONTENT_TYPE,
                        HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
                    );
                    response
                }
                None => error_response(&GatewayError::internal("metrics recorder not installed")),
            },
        }
    }
}

/// Builder for [`Gateway`].
pub struct GatewayBuilder {
    config: GatewayConfig,
    verifier: Option<Arc<dyn TokenVerifier>>,
    metrics: Option<MetricsRegistry>,
}

impl GatewayBuilder {
    /// Use a custom token verifier instead of HS256 over the configured secret.
    #[must_use]
    pub fn verifier(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Use an already installed metrics recorder.
    #[must_use]
    pub fn metrics(mut self, registry: MetricsRegistry) -> Self {
        self.metrics = Some(registry);
        self
    }

    /// Build the gateway. Fails on invalid configuration or route conflicts.
    pub fn build(self) -> GatewayResult<Gateway> {
        let config = self.config;
        config.validate()?;

        let routes = RouteTable::from_config(&config)?;
        let forwarder = Forwarder::new(&config.server)?;

        let verifier = match self.verifier {
            Some(verifier) => verifier,
            None => Arc::new(HmacTokenVerifier::new(
                config.auth.jwt_secret.as_bytes(),
                config.auth.issuer.clone(),
            )),
        };

        let metrics = match self.metrics {
            Some(registry) => Some(registry),
            None => meridian_telemetry::init_metrics(&config.telemetry.metrics)
                .map_err(|e| GatewayError::internal(e.to_string()))?,
        };

        let mut health = HealthChecker::new();
        if config.server.probe_upstreams {
            health = health.with_upstream_probes(
                forwarder.client().clone(),
                routes.upstreams().to_vec(),
                config.server.connect_timeout,
            );
        }

        Ok(Gateway {
            inner: Arc::new(Inner {
                routes,
                verifier,
                forwarder,
                health,
                metrics,
                max_body_size: config.server.max_request_body_size,
            }),
        })
    }
}

async fn read_body<B>(headers: &HeaderMap, body: B, limit: usize) -> GatewayResult<Bytes>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit as u64) {
        return Err(GatewayError::PayloadTooLarge { limit });
    }

    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(GatewayError::PayloadTooLarge { limit })
        }
        Err(e) => Err(GatewayError::bad_request(format!("failed to read body: {e}"))),
    }
}

fn full(data: impl Into<Bytes>) -> GatewayBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<GatewayBody> {
    let body = match serde_json::to_vec(value) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize response");
            return error_response(&GatewayError::internal(e.to_string()));
        }
    };

    let mut response = Response::new(full(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Render an error as `{"error": "<code>"}` with its status.
pub fn error_response(err: &GatewayError) -> Response<GatewayBody> {
    let status = err.status_code();
    if status.is_server_error() && !matches!(
        err,
        GatewayError::UpstreamTimeout { .. } | GatewayError::UpstreamUnreachable { .. }
    ) {
        tracing::error!(error = %err, "Request failed");
    }

    let body = serde_json::to_vec(&ErrorResponse::from(err))
        .unwrap_or_else(|_| br#"{"error":"internal_error"}"#.to_vec());

    let mut response = Response::new(full(body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if status == StatusCode::UNAUTHORIZED {
        headers.insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;
    use http::Method;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "dispatcher-test-secret";

    struct CountingVerifier {
        calls: AtomicUsize,
    }

    impl TokenVerifier for CountingVerifier {
        fn verify(&self, _token: &str) -> Result<IdentityClaim, VerificationFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(IdentityClaim::new(5, "counted@example.com".to_string(), None, None))
        }
    }

    fn config() -> GatewayConfig {
        GatewayConfig::builder()
            .jwt_secret(SECRET)
            .metrics(false)
            .build()
            .unwrap()
    }

    fn gateway() -> Gateway {
        Gateway::from_config(config()).unwrap()
    }

    fn token(user_id: u64, exp_offset: i64) -> String {
        let claims = serde_json::json!({
            "user_id": user_id,
            "email": "ada@example.com",
            "exp": Utc::now().timestamp() + exp_offset,
        });
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    async fn body_string(response: Response<GatewayBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn request(method: Method, uri: &str, headers: HeaderMap) -> Request<Full<Bytes>> {
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(Bytes::new()))
            .unwrap();
        *req.headers_mut() = headers;
        req
    }

    #[test]
    fn test_authorize_required() {
        let gw = gateway();

        let decision = gw
            .authorize(AuthMode::Required, &bearer(&token(9, 3600)))
            .unwrap();
        assert_eq!(decision.claim().unwrap().subject(), 9);

        assert_eq!(
            gw.authorize(AuthMode::Required, &HeaderMap::new()),
            Err(VerificationFailure::MissingHeader)
        );
        assert_eq!(
            gw.authorize(AuthMode::Required, &bearer(&token(9, -10))),
            Err(VerificationFailure::Expired)
        );
    }

    #[test]
    fn test_authorize_optional_fails_open() {
        let gw = gateway();

        assert_eq!(
            gw.authorize(AuthMode::Optional, &HeaderMap::new()),
            Ok(AuthDecision::Anonymous)
        );
        assert_eq!(
            gw.authorize(AuthMode::Optional, &bearer("garbage")),
            Ok(AuthDecision::Anonymous)
        );
        assert_eq!(
            gw.authorize(AuthMode::Optional, &bearer(&token(9, -10))),
            Ok(AuthDecision::Anonymous)
        );
        assert!(matches!(
            gw.authorize(AuthMode::Optional, &bearer(&token(9, 3600))),
            Ok(AuthDecision::Authenticated(_))
        ));
    }

    #[test]
    fn test_authorize_none_skips_verifier() {
        let verifier = Arc::new(CountingVerifier {
            calls: AtomicUsize::new(0),
        });
        let gw = Gateway::builder(config())
            .verifier(verifier.clone())
            .build()
            .unwrap();

        assert_eq!(
            gw.authorize(AuthMode::None, &bearer("anything")),
            Ok(AuthDecision::Skipped)
        );
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);

        gw.authorize(AuthMode::Optional, &bearer("anything")).unwrap();
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let response = gateway()
            .dispatch(request(Method::GET, "/nope", HeaderMap::new()), peer())
            .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().contains_key(&HEADER_REQUEST_ID));
        assert_eq!(body_string(response).await, r#"{"error":"route_not_found"}"#);
    }

    #[tokio::test]
    async fn test_required_route_rejects_before_forwarding() {
        let response = gateway()
            .dispatch(
                request(Method::POST, "/businesses/42/reviews", bearer(&token(1, -60))),
                peer(),
            )
            .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers().get(WWW_AUTHENTICATE).unwrap(), "Bearer");
        assert_eq!(body_string(response).await, r#"{"error":"expired"}"#);
    }

    #[tokio::test]
    async fn test_malformed_prefix_is_distinct() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::AUTHORIZATION, HeaderValue::from_static("Token abc"));
        let response = gateway()
            .dispatch(request(Method::GET, "/auth/me", headers), peer())
            .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_string(response).await, r#"{"error":"malformed_header"}"#);
    }

    #[tokio::test]
    async fn test_builtins() {
        let gw = gateway();

        let response = gw.dispatch(request(Method::GET, "/", HeaderMap::new()), peer()).await;
        assert_eq!(
            body_string(response).await,
            r#"{"message":"API Gateway is running!"}"#
        );

        let response = gw
            .dispatch(request(Method::GET, "/health", HeaderMap::new()), peer())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, r#"{"status":"healthy"}"#);

        let response = gw
            .dispatch(request(Method::GET, "/ready", HeaderMap::new()), peer())
            .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        gw.health().set_ready(true);
        let response = gw
            .dispatch(request(Method::GET, "/ready", HeaderMap::new()), peer())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, r#"{"status":"ready"}"#);
    }

    #[tokio::test]
    async fn test_client_request_id_is_echoed() {
        let mut headers = HeaderMap::new();
        headers.insert(&HEADER_REQUEST_ID, HeaderValue::from_static("req-77"));
        let response = gateway()
            .dispatch(request(Method::GET, "/health", headers), peer())
            .await;
        assert_eq!(response.headers().get(&HEADER_REQUEST_ID).unwrap(), "req-77");
    }

    #[tokio::test]
    async fn test_declared_oversized_body_is_413() {
        let mut config = config();
        config.server.max_request_body_size = 8;
        let gw = Gateway::from_config(config).unwrap();

        let req = Request::builder()
            .method(Method::POST)
            .uri("/auth/login")
            .header(CONTENT_LENGTH, "64")
            .body(Full::new(Bytes::from(vec![b'x'; 64])))
            .unwrap();
        let response = gw.dispatch(req, peer()).await;

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body_string(response).await, r#"{"error":"payload_too_large"}"#);
    }

    #[tokio::test]
    async fn test_streamed_oversized_body_is_413() {
        let body = Full::new(Bytes::from(vec![b'x'; 64]));
        let limit_err = read_body(&HeaderMap::new(), body, 8).await.unwrap_err();
        assert!(matches!(limit_err, GatewayError::PayloadTooLarge { limit: 8 }));

        let ok = read_body(&HeaderMap::new(), Full::new(Bytes::from("{}")), 8)
            .await
            .unwrap();
        assert_eq!(ok, Bytes::from("{}"));
    }

    #[test]
    fn test_gateway_rejects_invalid_config() {
        let mut config = GatewayConfig::default();
        config.auth.jwt_secret.clear();
        assert!(Gateway::from_config(config).is_err());
    }
}
