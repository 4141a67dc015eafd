//! # Console Telemetry
//!
//! Logging and metrics for the NetConsole client.
//!
//! ## Components
//!
//! - **Logging**: `tracing` subscriber with an `EnvFilter`, text or JSON output
//! - **Metrics**: Prometheus counters, gauges and histograms for the request
//!   pipeline and the connection supervisor
//!
//! ## Usage
//!
//! ```rust,ignore
//! use console_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() {
//!     let _guard = init_telemetry(TelemetryConfig::from_env()).expect("telemetry");
//!     // Application code here
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `NETCONSOLE_SERVICE_NAME` | `netconsole` | Service name in logs |
//! | `NETCONSOLE_LOG_LEVEL` | `info` | Log level filter (falls back to `RUST_LOG`) |
//! | `NETCONSOLE_JSON_LOGS` | `false` | Emit JSON instead of text |
//! | `NETCONSOLE_CONSOLE_OUTPUT` | `true` | Write logs to stderr at all |

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::init_logging;
pub use metrics::{encode_metrics, register_metrics, MetricsHandle};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging and register metrics.
///
/// Returns a guard that should be held for the lifetime of the application.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let metrics = register_metrics()?;
    init_logging(&config)?;

    Ok(TelemetryGuard {
        service_name: config.service_name,
        _metrics: metrics,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    service_name: String,
    _metrics: MetricsHandle,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::debug!(service = %self.service_name, "Shutting down telemetry");
    }
}

/// Convenience macro for recording a metric increment.
#[macro_export]
macro_rules! metric_inc {
    ($metric:ident) => {
        $crate::metrics::$metric.inc()
    };
}
