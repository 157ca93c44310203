//! Forwarding engine: relays a request to an upstream and streams the answer back.

use std::time::Duration;

use bytes::Bytes;
use futures_util::TryStreamExt;
use http::{HeaderMap, Method, Response};
use http_body_util::{combinators::UnsyncBoxBody, BodyExt, StreamBody};
use hyper::body::Frame;
use reqwest::{Client, Url};

use crate::config::ServerSettings;
use crate::error::{GatewayError, GatewayResult};
use crate::headers::{filter_headers, filter_request_headers};
use crate::routes::UpstreamTarget;

/// Error type carried by response bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Response body type used throughout the gateway.
pub type GatewayBody = UnsyncBoxBody<Bytes, BoxError>;

/// A request on its way to an upstream.
#[derive(Debug)]
pub struct ProxyRequest {
    /// HTTP method.
    pub method: Method,
    /// Path and query string, verbatim from the client.
    pub path_and_query: String,
    /// Outbound headers.
    pub headers: HeaderMap,
    /// Buffered request body.
    pub body: Bytes,
}

impl ProxyRequest {
    /// Create a proxy request from inbound parts. Hop-by-hop headers, `host`
    /// and `content-length` are dropped here.
    pub fn new(
        method: Method,
        path_and_query: impl Into<String>,
        inbound_headers: &HeaderMap,
        body: Bytes,
    ) -> Self {
        Self {
            method,
            path_and_query: path_and_query.into(),
            headers: filter_request_headers(inbound_headers),
            body,
        }
    }
}

/// Shared HTTP client for all upstreams.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: Client,
    timeout: Duration,
}

impl Forwarder {
    /// Create a forwarder with one connection pool for all upstreams.
    pub fn new(settings: &ServerSettings) -> GatewayResult<Self> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .pool_max_idle_per_host(settings.pool_max_idle_per_host)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GatewayError::internal(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            timeout: settings.upstream_timeout,
        })
    }

    /// Per-request upstream timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The underlying client, shared with readiness probes.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Forward `request` to `upstream`.
    ///
    /// Status and headers are relayed once they arrive; the body streams
    /// through as the upstream produces it. The timeout covers the whole
    /// exchange. Nothing is retried.
    pub async fn forward(
        &self,
        upstream: &UpstreamTarget,
        request: ProxyRequest,
    ) -> GatewayResult<Response<GatewayBody>> {
        let url = outbound_url(&upstream.base_url, &request.path_and_query);

        let mut builder = self
            .client
            .request(request.method, url)
            .headers(request.headers)
            .timeout(self.timeout);
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let upstream_response = builder
            .send()
            .await
            .map_err(|e| classify_error(&upstream.name, &e))?;

        let status = upstream_response.status();
        let headers = filter_headers(upstream_response.headers());

        let stream = upstream_response
            .bytes_stream()
            .map_ok(Frame::data)
            .map_err(|e| Box::new(e) as BoxError);
        let body = StreamBody::new(stream).boxed_unsync();

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Join an upstream base URL with the client's path and query.
///
/// The base URL's own path is kept as a prefix: `http://svc/v1` and
/// `/items?x=1` give `http://svc/v1/items?x=1`.
pub fn outbound_url(base: &Url, path_and_query: &str) -> String {
    let base = base.as_str().trim_end_matches('/');
    if path_and_query.starts_with('/') {
        format!("{base}{path_and_query}")
    } else {
        format!("{base}/{path_and_query}")
    }
}

fn classify_error(upstream: &str, err: &reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        meridian_telemetry::metrics::record_upstream_error(upstream, "timeout");
        tracing::error!(upstream, error = %err, "Upstream timed out");
        GatewayError::UpstreamTimeout {
            upstream: upstream.to_string(),
        }
    } else {
        meridian_telemetry::metrics::record_upstream_error(upstream, "unreachable");
        tracing::error!(upstream, error = %err, "Upstream unreachable");
        GatewayError::UpstreamUnreachable {
            upstream: upstream.to_string(),
            message: err.to_string(),
        }
    }
}
