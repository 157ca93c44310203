//! Observability for the Meridian gateway.
//!
//! - **Logging**: structured JSON (or pretty) output through `tracing-subscriber`
//! - **Metrics**: Prometheus text format through the `metrics` facade
//!
//! # Example
//!
//! ```rust,ignore
//! use meridian_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let metrics = init_telemetry(&TelemetryConfig::default())?;
//! if let Some(metrics) = metrics {
//!     println!("{}", metrics.render());
//! }
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod logging;
pub mod metrics;

use serde::{Deserialize, Serialize};

pub use crate::error::TelemetryError;
pub use crate::logging::{init_logging, LogConfig, LogFormat};
pub use crate::metrics::{init_metrics, InFlightGuard, MetricsConfig, MetricsRegistry};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Combined telemetry settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Logging settings.
    pub log: LogConfig,
    /// Metrics settings.
    pub metrics: MetricsConfig,
}

/// Initializes logging, then metrics.
///
/// Returns the metrics handle when metrics are enabled.
///
/// # Errors
///
/// Returns `TelemetryError` if either subsystem fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<Option<MetricsRegistry>> {
    init_logging(&config.log)?;
    init_metrics(&config.metrics)
}
