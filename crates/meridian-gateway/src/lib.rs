//! Meridian API gateway.
//!
//! A single entry point in front of the auth, business, review and logging
//! services. Each request is matched against a static route table, its
//! bearer token is checked according to the route's auth mode, and it is
//! forwarded to the route's upstream with the verified identity attached.
//!
//! # Architecture
//!
//! ```text
//!                    ┌──────────────────────── Gateway ────────────────────────┐
//!                    │                                                         │
//!   client ────────► │  RouteTable ──► authorize ──► propagate ──► Forwarder   │ ───► upstream
//!                    │  (404)          (401)         X-User-*      (502/504)   │
//!          ◄──────── │                                                         │ ◄───
//!                    └─────────────────────────────────────────────────────────┘
//! ```
//!
//! | Auth mode | Missing or bad token | Valid token |
//! |-----------|----------------------|-------------|
//! | `required` | 401 `{"error":"<reason>"}` | forwarded with `X-User-ID`, `X-User-Email` |
//! | `optional` | forwarded anonymously | forwarded with identity |
//! | `none` | forwarded, token never inspected | forwarded, no identity headers |
//!
//! # Example
//!
//! ```rust,ignore
//! use meridian_gateway::{Gateway, GatewayConfig, GatewayServer, ShutdownSignal};
//!
//! let config = GatewayConfig::default().with_env_overrides()?;
//! let addr = config.server.socket_addr()?;
//! let gateway = Gateway::from_config(config)?;
//! GatewayServer::new(gateway, std::time::Duration::from_secs(30))
//!     .run(addr, ShutdownSignal::with_os_signals())
//!     .await?;
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod headers;
pub mod health;
pub mod identity;
pub mod proxy;
pub mod routes;
pub mod server;
pub mod shutdown;

pub use auth::{HmacTokenVerifier, IdentityClaim, TokenVerifier, VerificationFailure};
pub use config::{GatewayConfig, GatewayConfigBuilder, RouteSpec};
pub use dispatcher::{AuthDecision, Gateway, GatewayBuilder};
pub use error::{ErrorResponse, GatewayError, GatewayResult};
pub use health::{HealthChecker, ReadinessStatus};
pub use proxy::{Forwarder, GatewayBody};
pub use routes::{AuthMode, RouteEntry, RouteTable};
pub use server::GatewayServer;
pub use shutdown::ShutdownSignal;

/// Gateway version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
