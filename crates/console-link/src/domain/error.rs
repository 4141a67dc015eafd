//! Error taxonomy for the console client.
//!
//! - [`ClientError`]: what a caller sees when a request cannot be answered.
//! - [`RemoteError`]: an application-level `success: false` reply.
//! - [`ProtocolError`]: an inbound frame that could not be decoded.
//! - [`ConfigError`] / [`CredentialError`]: local setup problems.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure delivered to a request's completion instead of a response.
///
/// Connection-level problems never surface here in detail; the supervisor
/// recovers from them and callers only learn that their request was lost.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("not connected to the server")]
    NotConnected,
    #[error("connection to the server was lost")]
    ConnectionLost,
    #[error("client has been stopped")]
    Stopped,
    #[error("no response within {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("a login request is already outstanding")]
    LoginInProgress,
    #[error("invalid request parameters: {0}")]
    InvalidParams(String),
    #[error("failed to encode request: {0}")]
    Encode(String),
    #[error("failed to start network thread: {0}")]
    Spawn(String),
}

impl ClientError {
    /// Whether retrying the same request later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::NotConnected | ClientError::ConnectionLost | ClientError::Timeout(_)
        )
    }
}

/// Application-level failure reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("server rejected the request: {message}")]
pub struct RemoteError {
    pub message: String,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// An inbound frame that could not be turned into a response.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame does not match the response shape: {0}")]
    InvalidShape(#[source] serde_json::Error),
    #[error("binary frame is not UTF-8")]
    NotUtf8,
}

/// Configuration validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    #[error("invalid backoff policy: {0}")]
    InvalidBackoff(String),
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Local credential record errors
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("password hash must be 64 hex characters")]
    InvalidHash,
    #[error("login must not be empty")]
    EmptyLogin,
    #[error("credential store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("credential store at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
