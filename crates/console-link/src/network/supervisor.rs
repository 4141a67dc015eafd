//! Connect, run, detect failure, back off, reconnect.

use super::{shutdown_requested, NetworkActor, SessionError};
use crate::domain::error::ClientError;
use crate::domain::state::ConnectionState;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

pub(super) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How a session ended
pub(super) enum SessionEnd {
    Shutdown,
    Lost(SessionError),
}

impl NetworkActor {
    /// Supervisor loop. Returns only after shutdown has been requested.
    pub(crate) async fn run_forever(mut self) {
        info!(endpoint = %self.config.endpoint, "Network context started");
        let mut attempt: u32 = 0;

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            self.set_state(ConnectionState::Connecting);
            self.shared.stats.record_connect_attempt();

            match self.connect().await {
                Ok(None) => break,
                Ok(Some(ws)) => {
                    attempt = 0;
                    self.shared.stats.record_connected();
                    self.set_state(ConnectionState::Connected);

                    match self.run_session(ws).await {
                        SessionEnd::Shutdown => {
                            self.shared.stats.record_disconnected(false);
                            break;
                        }
                        SessionEnd::Lost(e) => {
                            warn!(error = %e, "Connection lost");
                            self.shared.stats.record_disconnected(true);
                            self.fail_in_flight(&ClientError::ConnectionLost);
                            self.set_state(ConnectionState::Disconnected);
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, attempt, "Connection attempt failed");
                    self.shared.stats.record_disconnected(false);
                    self.set_state(ConnectionState::Failed);
                }
            }

            let delay = self.config.reconnect.delay_for(attempt);
            attempt = attempt.saturating_add(1);
            debug!(delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
            if !self.wait_backoff(delay).await {
                break;
            }
        }

        self.finish();
    }

    /// One connection attempt, bounded by `connect_timeout`.
    ///
    /// `Ok(None)` means shutdown was requested while connecting.
    async fn connect(&mut self) -> Result<Option<WsStream>, SessionError> {
        let limit = self.config.connect_timeout;
        let connecting = tokio::time::timeout(limit, connect_async(self.config.endpoint.clone()));
        tokio::pin!(connecting);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => return Ok(None),
                result = &mut connecting => {
                    return match result {
                        Ok(Ok((ws, _))) => {
                            debug!(endpoint = %self.config.endpoint, "WebSocket handshake complete");
                            Ok(Some(ws))
                        }
                        Ok(Err(e)) => Err(SessionError::Connect(e)),
                        Err(_) => Err(SessionError::HandshakeTimeout(limit)),
                    };
                }
                Some(command) = self.commands.recv() => {
                    self.reject(command, ClientError::NotConnected);
                }
            }
        }
    }

    /// Sleep out the backoff delay while still refusing requests.
    ///
    /// Returns `false` if shutdown was requested meanwhile.
    async fn wait_backoff(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => return false,
                _ = &mut sleep => return true,
                Some(command) = self.commands.recv() => {
                    self.reject(command, ClientError::NotConnected);
                }
            }
        }
    }
}
