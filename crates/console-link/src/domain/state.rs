use serde::Serialize;
use std::fmt;

/// Connection lifecycle as seen by observers.
///
/// ```text
/// Disconnected -> Connecting -> Connected -> Disconnected -> Connecting ...
///                     |
///                     +-> Failed (backoff) -> Connecting ...
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not started, lost, or stopped
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// The last attempt failed; waiting out the backoff delay
    Failed,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}
