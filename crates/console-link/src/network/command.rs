use crate::domain::correlation::RequestId;
use crate::domain::pending::Completion;
use std::time::Duration;

/// Message from a client handle to the network context.
///
/// Frames are encoded on the caller side so encoding errors surface
/// synchronously and the network context only ever writes text.
#[derive(Debug)]
pub(crate) enum Command {
    /// Register `completion` under `id`, then write `frame`
    Request {
        id: RequestId,
        action: String,
        frame: String,
        timeout: Duration,
        completion: Completion,
    },
    /// Write an uncorrelated login frame
    Login { frame: String },
}

impl Command {
    pub(crate) fn describe(&self) -> &str {
        match self {
            Command::Request { action, .. } => action,
            Command::Login { .. } => "auth_login",
        }
    }
}
