//! The network context.
//!
//! A dedicated `console-net` thread runs a current-thread runtime hosting a
//! single actor. The actor owns the socket, the correlation table and the
//! login slot; client handles reach it only through the command channel and
//! the shutdown signal.

mod command;
mod session;
mod supervisor;

pub(crate) use command::Command;

use crate::bridge::{CompletionBridge, Observers};
use crate::domain::config::ClientConfig;
use crate::domain::error::ClientError;
use crate::domain::pending::PendingTable;
use crate::domain::state::ConnectionState;
use crate::domain::stats::ClientStats;
use crate::login::{LoginChannel, LoginOutcome};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite;
use tracing::{debug, error, info};

/// Name of the network thread
pub const NETWORK_THREAD_NAME: &str = "console-net";

/// Why a connection attempt or an established session ended.
///
/// Never leaves the network context; callers only see the resulting
/// [`ClientError`] on their requests.
#[derive(Debug, Error)]
pub(crate) enum SessionError {
    #[error("connect failed: {0}")]
    Connect(#[source] tungstenite::Error),
    #[error("handshake did not complete within {}ms", .0.as_millis())]
    HandshakeTimeout(Duration),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("no keepalive reply within {}ms", .0.as_millis())]
    KeepaliveTimeout(Duration),
    #[error("connection closed by peer")]
    ClosedByPeer,
}

/// State shared with the client handles.
pub(crate) struct Shared {
    pub(crate) bridge: CompletionBridge,
    pub(crate) stats: Arc<ClientStats>,
    pub(crate) login: Arc<LoginChannel>,
    pub(crate) connectivity: Arc<Observers<ConnectionState>>,
}

/// Owns everything that lives on the network thread.
pub(crate) struct NetworkActor {
    config: ClientConfig,
    shared: Shared,
    commands: mpsc::UnboundedReceiver<Command>,
    shutdown: watch::Receiver<bool>,
    state: watch::Sender<ConnectionState>,
    table: PendingTable,
    /// Set while a login frame is on the wire
    login_deadline: Option<Instant>,
}

impl NetworkActor {
    pub(crate) fn new(
        config: ClientConfig,
        shared: Shared,
        commands: mpsc::UnboundedReceiver<Command>,
        shutdown: watch::Receiver<bool>,
        state: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            config,
            shared,
            commands,
            shutdown,
            state,
            table: PendingTable::new(),
            login_deadline: None,
        }
    }

    /// Move to `next`, notifying observers if it is a change.
    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            info!(state = %next, endpoint = %self.config.endpoint, "Connection state changed");
            self.shared.connectivity.notify(next, &self.shared.bridge);
        }
    }

    /// Refuse a command because there is no live connection.
    fn reject(&mut self, command: Command, reason: ClientError) {
        debug!(action = command.describe(), error = %reason, "Rejecting command");
        match command {
            Command::Request { id, completion, .. } => {
                if reason == ClientError::NotConnected {
                    self.shared.stats.record_rejected_offline();
                } else {
                    self.shared.stats.record_abandoned(1);
                }
                if !completion.complete(Err(reason), &self.shared.bridge) {
                    debug!(request_id = %id, "Requester no longer waiting");
                }
            }
            Command::Login { .. } => {
                self.shared
                    .login
                    .publish(LoginOutcome::Failed(reason), &self.shared.bridge);
            }
        }
    }

    /// Resolve everything in flight with `reason`.
    fn fail_in_flight(&mut self, reason: &ClientError) {
        let abandoned = self.table.drain();
        self.shared.stats.set_pending(self.table.len());
        if !abandoned.is_empty() {
            info!(count = abandoned.len(), error = %reason, "Failing in-flight requests");
            self.shared.stats.record_abandoned(abandoned.len());
        }
        for pending in abandoned {
            debug!(request_id = %pending.id, action = %pending.action, "Request abandoned");
            pending
                .completion
                .complete(Err(reason.clone()), &self.shared.bridge);
        }

        if self.login_deadline.take().is_some() {
            self.shared
                .login
                .publish(LoginOutcome::Failed(reason.clone()), &self.shared.bridge);
        }
    }

    /// Final cleanup once the supervisor loop has exited.
    fn finish(&mut self) {
        self.fail_in_flight(&ClientError::Stopped);
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            self.reject(command, ClientError::Stopped);
        }
        self.set_state(ConnectionState::Disconnected);
        info!("Network context stopped");
    }
}

/// Resolves once shutdown has been requested or every client handle is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Start the actor on its own thread.
pub(crate) fn spawn(actor: NetworkActor) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name(NETWORK_THREAD_NAME.to_owned())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!(error = %e, "Failed to build network runtime");
                    return;
                }
            };
            runtime.block_on(actor.run_forever());
        })
}
