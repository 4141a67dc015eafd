//! Prometheus metrics for the console client.
//!
//! All metrics follow the naming convention: `netconsole_<area>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., requests_sent_total)
//! - **Gauge**: Value that can go up or down (e.g., pending_requests)
//! - **Histogram**: Distribution of values (e.g., response_latency_seconds)

use lazy_static::lazy_static;
use prometheus::{exponential_buckets, Counter, Encoder, Gauge, Histogram, Registry, TextEncoder};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // REQUEST METRICS
    // =========================================================================

    /// Requests written to the socket
    pub static ref REQUESTS_SENT: Counter = Counter::new(
        "netconsole_requests_sent_total",
        "Total number of correlated requests written to the connection"
    ).expect("metric creation failed");

    /// Responses matched to a pending request
    pub static ref RESPONSES_DELIVERED: Counter = Counter::new(
        "netconsole_responses_delivered_total",
        "Total number of responses routed to their pending request"
    ).expect("metric creation failed");

    /// Responses with an unknown or already-consumed id
    pub static ref ORPHANED_RESPONSES: Counter = Counter::new(
        "netconsole_responses_orphaned_total",
        "Responses whose id matched no pending request"
    ).expect("metric creation failed");

    /// Frames that could not be decoded
    pub static ref MALFORMED_FRAMES: Counter = Counter::new(
        "netconsole_frames_malformed_total",
        "Inbound frames dropped because they could not be decoded"
    ).expect("metric creation failed");

    /// Requests resolved by their deadline
    pub static ref REQUEST_TIMEOUTS: Counter = Counter::new(
        "netconsole_requests_timed_out_total",
        "Pending requests resolved with a timeout error"
    ).expect("metric creation failed");

    /// Requests failed because the connection dropped or was stopped
    pub static ref REQUESTS_ABANDONED: Counter = Counter::new(
        "netconsole_requests_abandoned_total",
        "Pending requests failed by connection loss or shutdown"
    ).expect("metric creation failed");

    /// Requests currently waiting for a response
    pub static ref PENDING_REQUESTS: Gauge = Gauge::new(
        "netconsole_pending_requests",
        "Requests currently in the correlation table"
    ).expect("metric creation failed");

    /// Round trip time from send to response
    pub static ref RESPONSE_LATENCY: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "netconsole_response_latency_seconds",
            "Time between writing a request and routing its response"
        ).buckets(exponential_buckets(0.001, 2.0, 15).unwrap_or_default())
    ).expect("metric creation failed");

    // =========================================================================
    // CONNECTION METRICS
    // =========================================================================

    /// Connection attempts made by the supervisor
    pub static ref CONNECT_ATTEMPTS: Counter = Counter::new(
        "netconsole_connect_attempts_total",
        "Connection attempts, including reconnects"
    ).expect("metric creation failed");

    /// Established connections that were subsequently lost
    pub static ref CONNECTIONS_LOST: Counter = Counter::new(
        "netconsole_connections_lost_total",
        "Established connections that failed"
    ).expect("metric creation failed");

    /// 1 while connected, 0 otherwise
    pub static ref CONNECTED: Gauge = Gauge::new(
        "netconsole_connected",
        "Whether the client currently holds a live connection"
    ).expect("metric creation failed");
}

/// Marker returned once the metrics are registered.
#[derive(Debug, Clone, Copy)]
pub struct MetricsHandle {
    _private: (),
}

/// Register all metrics with the global registry.
///
/// Safe to call more than once; metrics that are already registered are
/// left in place.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Requests
        Box::new(REQUESTS_SENT.clone()),
        Box::new(RESPONSES_DELIVERED.clone()),
        Box::new(ORPHANED_RESPONSES.clone()),
        Box::new(MALFORMED_FRAMES.clone()),
        Box::new(REQUEST_TIMEOUTS.clone()),
        Box::new(REQUESTS_ABANDONED.clone()),
        Box::new(PENDING_REQUESTS.clone()),
        Box::new(RESPONSE_LATENCY.clone()),
        // Connection
        Box::new(CONNECT_ATTEMPTS.clone()),
        Box::new(CONNECTIONS_LOST.clone()),
        Box::new(CONNECTED.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle { _private: () })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
