//! The caller-facing handle.

use crate::bridge::{CompletionBridge, Observers};
use crate::domain::config::ClientConfig;
use crate::domain::correlation::RequestId;
use crate::domain::credential::Credential;
use crate::domain::envelope::{Request, Response};
use crate::domain::error::{ClientError, ConfigError};
use crate::domain::pending::{Completion, RequestResult};
use crate::domain::state::ConnectionState;
use crate::domain::stats::{ClientStats, StatsSnapshot};
use crate::login::{LoginChannel, LoginOutcome};
use crate::network::{self, Command, NetworkActor, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info};

/// Network thread lifecycle
enum Lifecycle {
    /// Built but not started; the actor waits here
    Idle(Box<NetworkActor>),
    Running(thread::JoinHandle<()>),
    Stopped,
}

impl Lifecycle {
    fn check_running(&self) -> Result<(), ClientError> {
        match self {
            Lifecycle::Running(_) => Ok(()),
            Lifecycle::Idle(_) => Err(ClientError::NotConnected),
            Lifecycle::Stopped => Err(ClientError::Stopped),
        }
    }
}

struct Inner {
    config: ClientConfig,
    lifecycle: Mutex<Lifecycle>,
    commands: mpsc::UnboundedSender<Command>,
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<ConnectionState>,
    bridge: CompletionBridge,
    stats: Arc<ClientStats>,
    login: Arc<LoginChannel>,
    connectivity: Arc<Observers<ConnectionState>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // The thread notices and winds down on its own; joining here could
        // block an async context.
        self.shutdown.send_replace(true);
    }
}

/// Handle to one persistent connection. Cheap to clone.
///
/// ```rust,ignore
/// let (bridge, mut queue) = completion_bridge();
/// let client = ConsoleClient::new(ClientConfig::default(), bridge)?;
/// client.start()?;
/// let models = client.send_request(actions::LIST_MODELS, ())?.await?;
/// ```
#[derive(Clone)]
pub struct ConsoleClient {
    inner: Arc<Inner>,
}

impl ConsoleClient {
    /// Validate `config` and build a client. Nothing connects until
    /// [`start`](Self::start).
    ///
    /// Callbacks and observers run wherever the [`crate::CallerQueue`]
    /// paired with `bridge` is drained.
    pub fn new(config: ClientConfig, bridge: CompletionBridge) -> Result<Self, ConfigError> {
        config.validate()?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let stats = Arc::new(ClientStats::default());
        let login = Arc::new(LoginChannel::new());
        let connectivity = Arc::new(Observers::new());

        let shared = Shared {
            bridge: bridge.clone(),
            stats: Arc::clone(&stats),
            login: Arc::clone(&login),
            connectivity: Arc::clone(&connectivity),
        };
        let actor = NetworkActor::new(config.clone(), shared, commands_rx, shutdown_rx, state_tx);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                lifecycle: Mutex::new(Lifecycle::Idle(Box::new(actor))),
                commands: commands_tx,
                shutdown: shutdown_tx,
                state: state_rx,
                bridge,
                stats,
                login,
                connectivity,
            }),
        })
    }

    /// Spawn the network thread. Calling it again while running is a no-op;
    /// a stopped client cannot be restarted.
    pub fn start(&self) -> Result<(), ClientError> {
        let mut lifecycle = self.inner.lifecycle.lock();
        match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Idle(actor) => match network::spawn(*actor) {
                Ok(handle) => {
                    info!(endpoint = %self.inner.config.endpoint, "Console client started");
                    *lifecycle = Lifecycle::Running(handle);
                    Ok(())
                }
                Err(e) => {
                    error!(error = %e, "Failed to spawn network thread");
                    Err(ClientError::Spawn(e.to_string()))
                }
            },
            running @ Lifecycle::Running(_) => {
                *lifecycle = running;
                Ok(())
            }
            Lifecycle::Stopped => Err(ClientError::Stopped),
        }
    }

    /// Stop for good.
    ///
    /// Closes the connection, fails everything still pending with
    /// [`ClientError::Stopped`] and waits for the network thread to exit.
    /// Once this returns no further response is routed.
    ///
    /// Joining blocks for up to the close grace period. From async code call
    /// it through `tokio::task::spawn_blocking` or `block_in_place`.
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *self.inner.lifecycle.lock(), Lifecycle::Stopped);
        self.inner.shutdown.send_replace(true);

        match previous {
            Lifecycle::Running(handle) => {
                if handle.thread().id() == thread::current().id() {
                    debug!("stop() called on the network thread, not joining");
                    return;
                }
                if handle.join().is_err() {
                    error!("Network thread panicked");
                }
                info!("Console client stopped");
            }
            Lifecycle::Idle(_) => info!("Console client stopped before it was started"),
            Lifecycle::Stopped => {}
        }
    }

    /// Issue `action` and get a future for its response.
    ///
    /// Fails synchronously only if `params` is not a JSON object. Every
    /// other failure arrives through the returned [`PendingResponse`].
    pub fn send_request(
        &self,
        action: &str,
        params: impl Serialize,
    ) -> Result<PendingResponse, ClientError> {
        self.send_request_timeout(action, params, self.inner.config.request_timeout)
    }

    /// [`send_request`](Self::send_request) with its own deadline.
    pub fn send_request_timeout(
        &self,
        action: &str,
        params: impl Serialize,
        timeout: Duration,
    ) -> Result<PendingResponse, ClientError> {
        let (tx, rx) = oneshot::channel();
        let id = self.submit(action, params, timeout, Completion::Channel(tx))?;
        Ok(PendingResponse { id, rx })
    }

    /// Issue `action` and have `handler` run on the caller context with the
    /// outcome.
    pub fn send_request_with<F>(
        &self,
        action: &str,
        params: impl Serialize,
        handler: F,
    ) -> Result<RequestId, ClientError>
    where
        F: FnOnce(RequestResult) + Send + 'static,
    {
        self.submit(
            action,
            params,
            self.inner.config.request_timeout,
            Completion::Callback(Box::new(handler)),
        )
    }

    fn submit(
        &self,
        action: &str,
        params: impl Serialize,
        timeout: Duration,
        completion: Completion,
    ) -> Result<RequestId, ClientError> {
        let id = RequestId::new();
        let frame = Request::new(action, id, params)?.encode()?;

        let running = self.inner.lifecycle.lock().check_running();
        if let Err(reason) = running {
            if reason == ClientError::NotConnected {
                self.inner.stats.record_rejected_offline();
            }
            completion.complete(Err(reason), &self.inner.bridge);
            return Ok(id);
        }

        let command = Command::Request {
            id,
            action: action.to_owned(),
            frame,
            timeout,
            completion,
        };
        if let Err(mpsc::error::SendError(command)) = self.inner.commands.send(command) {
            if let Command::Request { completion, .. } = command {
                completion.complete(Err(ClientError::Stopped), &self.inner.bridge);
            }
        }
        Ok(id)
    }

    /// Send the uncorrelated login request.
    ///
    /// The outcome is published to [`login_events`](Self::login_events)
    /// subscribers and [`on_login`](Self::on_login) observers. Fails with
    /// [`ClientError::LoginInProgress`] if a login is already outstanding.
    pub fn send_login(&self, credential: &Credential) -> Result<(), ClientError> {
        let frame = Request::login(credential).encode()?;
        self.inner.login.begin()?;
        debug!(login = %credential.login(), "Submitting login");

        let running = self.inner.lifecycle.lock().check_running();
        if let Err(reason) = running {
            self.publish_login_failure(reason);
            return Ok(());
        }
        if self.inner.commands.send(Command::Login { frame }).is_err() {
            self.publish_login_failure(ClientError::Stopped);
        }
        Ok(())
    }

    fn publish_login_failure(&self, reason: ClientError) {
        self.inner
            .login
            .publish(LoginOutcome::Failed(reason), &self.inner.bridge);
    }

    /// Log in and wait for the outcome.
    pub async fn login(&self, credential: &Credential) -> LoginOutcome {
        let mut events = self.login_events();
        if let Err(e) = self.send_login(credential) {
            return LoginOutcome::Failed(e);
        }
        loop {
            match events.recv().await {
                Ok(outcome) => return outcome,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    return LoginOutcome::Failed(ClientError::Stopped)
                }
            }
        }
    }

    /// Whether a login is waiting for its reply
    pub fn login_in_flight(&self) -> bool {
        self.inner.login.is_in_flight()
    }

    /// Receiver for every future login outcome
    pub fn login_events(&self) -> broadcast::Receiver<LoginOutcome> {
        self.inner.login.subscribe()
    }

    /// Run `observer` on the caller context after each login attempt.
    pub fn on_login(&self, observer: impl Fn(LoginOutcome) + Send + Sync + 'static) {
        self.inner.login.observe(observer);
    }

    /// Run `observer` on the caller context on every state transition.
    pub fn on_connectivity(&self, observer: impl Fn(ConnectionState) + Send + Sync + 'static) {
        self.inner.connectivity.add(observer);
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Receiver that tracks the connection state
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.clone()
    }

    /// Wait until the connection is up, at most `timeout`.
    pub async fn wait_until_connected(&self, timeout: Duration) -> Result<(), ClientError> {
        let mut state = self.watch_state();
        let waited = tokio::time::timeout(timeout, state.wait_for(|s| s.is_connected())).await;
        match waited {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(ClientError::Stopped),
            Err(_) => Err(ClientError::Timeout(timeout)),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Requests currently in the correlation table
    pub fn pending_count(&self) -> usize {
        self.inner.stats.pending()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for ConsoleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleClient")
            .field("endpoint", &self.inner.config.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

/// The eventual outcome of one [`ConsoleClient::send_request`].
#[derive(Debug)]
#[must_use = "a response is only observed by awaiting or waiting on it"]
pub struct PendingResponse {
    id: RequestId,
    rx: oneshot::Receiver<RequestResult>,
}

impl PendingResponse {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Block the current thread until the outcome arrives.
    ///
    /// Must not be called from inside an async runtime.
    pub fn wait(self) -> Result<Response, ClientError> {
        self.rx.blocking_recv().unwrap_or(Err(ClientError::Stopped))
    }
}

impl Future for PendingResponse {
    type Output = Result<Response, ClientError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(ClientError::Stopped)))
    }
}
