//! Error types for the gateway.
//!
//! Every request-path error maps to an HTTP status and a stable
//! machine-readable code. Clients only ever see `{"error": "<code>"}`;
//! the `Display` text is for logs.

use http::StatusCode;
use meridian_router::RouterError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::VerificationFailure;

/// Gateway errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Invalid configuration. Fatal at startup.
    #[error("Configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// Route table could not be built.
    #[error("Route table error: {0}")]
    Route(#[from] RouterError),

    /// No route matches the request method and path.
    #[error("No route for {method} {path}")]
    RouteNotFound {
        /// Request method.
        method: String,
        /// Request path.
        path: String,
    },

    /// Bearer token rejected on a route that requires authentication.
    #[error("Authentication failed: {0}")]
    Auth(#[from] VerificationFailure),

    /// The upstream could not be reached or the exchange broke off.
    #[error("Upstream `{upstream}` unreachable: {message}")]
    UpstreamUnreachable {
        /// Upstream name.
        upstream: String,
        /// Transport error text.
        message: String,
    },

    /// The upstream did not answer within the configured timeout.
    #[error("Upstream `{upstream}` timed out")]
    UpstreamTimeout {
        /// Upstream name.
        upstream: String,
    },

    /// Request body exceeded the configured limit.
    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge {
        /// Configured limit in bytes.
        limit: usize,
    },

    /// The request could not be read.
    #[error("Bad request: {message}")]
    BadRequest {
        /// Error message.
        message: String,
    },

    /// Server startup or accept error.
    #[error("Server error: {message}")]
    Server {
        /// Error message.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error.
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl GatewayError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a bad request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Create a server error.
    pub fn server(message: impl Into<String>) -> Self {
        Self::Server {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error.
    #[allow(clippy::match_same_arms)]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::UpstreamUnreachable { .. } => StatusCode::BAD_GATEWAY,
            Self::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Config { .. }
            | Self::Route(_)
            | Self::Server { .. }
            | Self::Io(_)
            | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the machine-readable code written to the response body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RouteNotFound { .. } => "route_not_found",
            Self::Auth(reason) => reason.code(),
            Self::UpstreamUnreachable { .. } => "upstream_unreachable",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::BadRequest { .. } => "bad_request",
            Self::Config { .. }
            | Self::Route(_)
            | Self::Server { .. }
            | Self::Io(_)
            | Self::Internal { .. } => "internal_error",
        }
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// JSON body of every gateway-generated error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code.
    pub error: String,
}

impl ErrorResponse {
    /// Create a new error response.
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

impl From<&GatewayError> for ErrorResponse {
    fn from(err: &GatewayError) -> Self {
        Self::new(err.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_and_code() {
        let err = GatewayError::RouteNotFound {
            method: "GET".to_string(),
            path: "/nope".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.code(), "route_not_found");

        let err = GatewayError::UpstreamTimeout {
            upstream: "review".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.code(), "upstream_timeout");

        let err = GatewayError::UpstreamUnreachable {
            upstream: "business".to_string(),
            message: "connection refused".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.code(), "upstream_unreachable");

        let err = GatewayError::PayloadTooLarge { limit: 10 };
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_auth_errors_surface_reason() {
        for (reason, code) in [
            (VerificationFailure::MissingHeader, "missing_header"),
            (VerificationFailure::MalformedHeader, "malformed_header"),
            (VerificationFailure::InvalidSignature, "invalid_signature"),
            (VerificationFailure::Expired, "expired"),
            (VerificationFailure::MalformedClaims, "malformed_claims"),
        ] {
            let err = GatewayError::from(reason);
            assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn test_internal_details_never_reach_the_body() {
        let err = GatewayError::internal("secret=hunter2");
        let body = serde_json::to_string(&ErrorResponse::from(&err)).unwrap();
        assert_eq!(body, r#"{"error":"internal_error"}"#);
    }
}
