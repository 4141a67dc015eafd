//! Client configuration.
//!
//! Loaded from TOML, with the endpoint overridable from the environment.
//! Durations are written in milliseconds:
//!
//! ```toml
//! endpoint = "ws://10.0.0.5:8765"
//! request_timeout_ms = 15000
//!
//! [reconnect]
//! kind = "exponential"
//! initial_ms = 500
//! factor = 2.0
//! max_ms = 10000
//! ```

use crate::domain::error::ConfigError;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Environment variable overriding [`ClientConfig::endpoint`]
pub const ENDPOINT_ENV: &str = "NETCONSOLE_ENDPOINT";

pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8765";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);
pub const DEFAULT_KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Delay between failed connection attempts.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// Same delay every time
    Fixed {
        #[serde_as(as = "DurationMilliSeconds<u64>")]
        #[serde(rename = "delay_ms")]
        delay: Duration,
    },
    /// `initial + step * attempt`, capped at `max`
    Linear {
        #[serde_as(as = "DurationMilliSeconds<u64>")]
        #[serde(rename = "initial_ms")]
        initial: Duration,
        #[serde_as(as = "DurationMilliSeconds<u64>")]
        #[serde(rename = "step_ms")]
        step: Duration,
        #[serde_as(as = "DurationMilliSeconds<u64>")]
        #[serde(rename = "max_ms")]
        max: Duration,
    },
    /// `initial * factor^attempt`, capped at `max`
    Exponential {
        #[serde_as(as = "DurationMilliSeconds<u64>")]
        #[serde(rename = "initial_ms")]
        initial: Duration,
        factor: f64,
        #[serde_as(as = "DurationMilliSeconds<u64>")]
        #[serde(rename = "max_ms")]
        max: Duration,
    },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Fixed {
            delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

impl BackoffPolicy {
    pub fn fixed(delay: Duration) -> Self {
        BackoffPolicy::Fixed { delay }
    }

    /// Delay before the retry that follows `attempt` consecutive failures
    /// (`attempt` starts at 0 for the first retry).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            BackoffPolicy::Fixed { delay } => delay,
            BackoffPolicy::Linear { initial, step, max } => step
                .checked_mul(attempt)
                .and_then(|grown| initial.checked_add(grown))
                .map_or(max, |delay| delay.min(max)),
            BackoffPolicy::Exponential {
                initial,
                factor,
                max,
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let secs = initial.as_secs_f64() * factor.powi(exponent);
                Duration::try_from_secs_f64(secs.min(max.as_secs_f64())).unwrap_or(max)
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            BackoffPolicy::Fixed { .. } => Ok(()),
            BackoffPolicy::Linear { initial, max, .. } => {
                if max < initial {
                    return Err(ConfigError::InvalidBackoff(
                        "linear max must not be below initial".into(),
                    ));
                }
                Ok(())
            }
            BackoffPolicy::Exponential {
                initial,
                factor,
                max,
            } => {
                if initial.is_zero() {
                    return Err(ConfigError::InvalidBackoff(
                        "exponential initial delay must be non-zero".into(),
                    ));
                }
                if !factor.is_finite() || factor < 1.0 {
                    return Err(ConfigError::InvalidBackoff(format!(
                        "exponential factor must be a finite number >= 1, got {factor}"
                    )));
                }
                if max < initial {
                    return Err(ConfigError::InvalidBackoff(
                        "exponential max must not be below initial".into(),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Connection and request settings for a [`crate::ConsoleClient`].
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `ws://` or `wss://` address of the management server
    pub endpoint: String,
    /// Bound on the TCP connect plus WebSocket handshake
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "connect_timeout_ms")]
    pub connect_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "keepalive_interval_ms")]
    pub keepalive_interval: Duration,
    /// Silence longer than this after a ping drops the connection
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "keepalive_timeout_ms")]
    pub keepalive_timeout: Duration,
    /// Deadline for requests that do not set their own
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "request_timeout_ms")]
    pub request_timeout: Duration,
    /// How often expired requests are swept
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "sweep_interval_ms")]
    pub sweep_interval: Duration,
    pub reconnect: BackoffPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            keepalive_timeout: DEFAULT_KEEPALIVE_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            reconnect: BackoffPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Default settings pointed at `endpoint`.
    pub fn for_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Load from a TOML file. Missing keys take their defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `NETCONSOLE_ENDPOINT` if it is set and non-empty.
    pub fn apply_env(self) -> Self {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    fn apply_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(endpoint) = lookup(ENDPOINT_ENV).filter(|v| !v.trim().is_empty()) {
            self.endpoint = endpoint.trim().to_owned();
        }
        self
    }

    /// Check the endpoint, durations and backoff policy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoint_url()?;

        let durations = [
            ("connect_timeout", self.connect_timeout),
            ("keepalive_interval", self.keepalive_interval),
            ("keepalive_timeout", self.keepalive_timeout),
            ("request_timeout", self.request_timeout),
            ("sweep_interval", self.sweep_interval),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::InvalidTimeout(format!("{name} must be non-zero")));
        }

        self.reconnect.validate()
    }

    /// The endpoint as a URL, checked for a supported scheme and a host.
    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidEndpoint {
            endpoint: self.endpoint.clone(),
            reason,
        };
        let url = Url::parse(&self.endpoint).map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "ws" => {}
            "wss" if cfg!(feature = "tls") => {}
            "wss" => return Err(invalid("wss:// requires the `tls` feature".into())),
            other => return Err(invalid(format!("unsupported scheme {other:?}"))),
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(invalid("missing host".into()));
        }
        Ok(url)
    }
}
