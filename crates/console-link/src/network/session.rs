//! One established connection: the receive loop, outbound writes,
//! keepalive pings and the deadline sweep.

use super::supervisor::SessionEnd;
use super::{shutdown_requested, Command, NetworkActor, SessionError};
use crate::domain::correlation::RequestId;
use crate::domain::envelope::InboundFrame;
use crate::domain::error::{ClientError, ProtocolError};
use crate::domain::pending::PendingRequest;
use crate::login::LoginOutcome;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::time::{Duration, Instant};
use tokio::time::{self, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, trace, warn};

/// How long a clean close may take before the socket is simply dropped
const CLOSE_GRACE: Duration = Duration::from_secs(1);

impl NetworkActor {
    /// Drive one connection until it fails or shutdown is requested.
    pub(super) async fn run_session<S>(&mut self, ws: S) -> SessionEnd
    where
        S: Stream<Item = Result<Message, tungstenite::Error>>
            + Sink<Message, Error = tungstenite::Error>
            + Unpin,
    {
        let (mut sink, mut stream) = ws.split();

        let keepalive_every = self.config.keepalive_interval;
        let keepalive_timeout = self.config.keepalive_timeout;
        let mut keepalive =
            time::interval_at(time::Instant::now() + keepalive_every, keepalive_every);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep = time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Deadline set by the first unanswered ping; any inbound frame clears it
        let mut pong_deadline: Option<time::Instant> = None;

        let end = loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => break SessionEnd::Shutdown,
                frame = stream.next() => match frame {
                    Some(Ok(message)) => {
                        pong_deadline = None;
                        if let Err(e) = self.handle_message(message, &mut sink).await {
                            break SessionEnd::Lost(e);
                        }
                    }
                    Some(Err(e)) => break SessionEnd::Lost(SessionError::WebSocket(e)),
                    None => break SessionEnd::Lost(SessionError::ClosedByPeer),
                },
                Some(command) = self.commands.recv() => {
                    if let Err(e) = self.dispatch(command, &mut sink).await {
                        break SessionEnd::Lost(e);
                    }
                }
                _ = keepalive.tick() => {
                    if pong_deadline.is_none() {
                        pong_deadline = Some(time::Instant::now() + keepalive_timeout);
                    }
                    trace!("Sending keepalive ping");
                    if let Err(e) = sink.send(Message::Ping(Vec::<u8>::new().into())).await {
                        break SessionEnd::Lost(SessionError::WebSocket(e));
                    }
                }
                _ = sleep_until_opt(pong_deadline) => {
                    break SessionEnd::Lost(SessionError::KeepaliveTimeout(keepalive_timeout));
                }
                _ = sweep.tick() => self.sweep_expired(),
            }
        };

        if matches!(end, SessionEnd::Shutdown) {
            match time::timeout(CLOSE_GRACE, sink.close()).await {
                Ok(Ok(())) => debug!("Connection closed cleanly"),
                Ok(Err(e)) => debug!(error = %e, "Error while closing connection"),
                Err(_) => debug!("Close handshake timed out"),
            }
        }
        end
    }

    async fn handle_message<K>(
        &mut self,
        message: Message,
        sink: &mut K,
    ) -> Result<(), SessionError>
    where
        K: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        match message {
            Message::Text(text) => self.handle_text(text.as_str()),
            Message::Binary(bytes) => match InboundFrame::decode_bytes(&bytes) {
                Ok(frame) => self.route(frame),
                Err(e) => self.drop_malformed(&e),
            },
            Message::Ping(payload) => {
                trace!("Answering server ping");
                sink.send(Message::Pong(payload)).await?;
            }
            Message::Pong(_) => trace!("Keepalive pong received"),
            Message::Close(frame) => {
                info!(frame = ?frame, "Server closed the connection");
                return Err(SessionError::ClosedByPeer);
            }
            Message::Frame(_) => {}
        }
        Ok(())
    }

    /// Decode and route one text frame. Undecodable frames are dropped.
    pub(super) fn handle_text(&mut self, text: &str) {
        match InboundFrame::decode(text) {
            Ok(frame) => self.route(frame),
            Err(e) => self.drop_malformed(&e),
        }
    }

    fn drop_malformed(&self, error: &ProtocolError) {
        self.shared.stats.record_malformed();
        warn!(error = %error, "Dropping malformed frame");
    }

    /// Hand a decoded frame to whoever is waiting for it.
    fn route(&mut self, frame: InboundFrame) {
        let InboundFrame { id, response } = frame;

        let Some(raw_id) = id else {
            if self.login_deadline.take().is_some() {
                self.shared
                    .login
                    .publish(LoginOutcome::from_response(response), &self.shared.bridge);
            } else {
                self.shared.stats.record_orphan();
                warn!("Dropping uncorrelated frame, no login outstanding");
            }
            return;
        };

        let pending = RequestId::parse(&raw_id)
            .ok()
            .and_then(|id| self.table.take(&id));
        let Some(pending) = pending else {
            self.shared.stats.record_orphan();
            warn!(request_id = %raw_id, "Dropping response for unknown or completed request");
            return;
        };

        let latency = pending.created_at.elapsed();
        self.shared.stats.record_delivered(latency);
        self.shared.stats.set_pending(self.table.len());
        debug!(
            request_id = %pending.id,
            action = %pending.action,
            latency_ms = latency.as_millis() as u64,
            success = response.success,
            "Routing response"
        );
        if !pending
            .completion
            .complete(Ok(response), &self.shared.bridge)
        {
            debug!(request_id = %pending.id, "Requester no longer waiting");
        }
    }

    /// Register and write one outbound command.
    async fn dispatch<K>(
        &mut self,
        command: Command,
        sink: &mut K,
    ) -> Result<(), SessionError>
    where
        K: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        match command {
            Command::Request {
                id,
                action,
                frame,
                timeout,
                completion,
            } => {
                // Entry goes in before the frame goes out
                let pending = PendingRequest::new(id, action, completion, timeout);
                if let Err(duplicate) = self.table.insert(pending) {
                    warn!(request_id = %id, "Request id already pending, refusing duplicate");
                    let reason = ClientError::InvalidParams(format!("request id {id} is already pending"));
                    duplicate
                        .completion
                        .complete(Err(reason), &self.shared.bridge);
                    return Ok(());
                }
                self.shared.stats.set_pending(self.table.len());

                sink.send(Message::Text(frame.into())).await?;
                self.shared.stats.record_sent();
                debug!(request_id = %id, "Request sent");
            }
            Command::Login { frame } => {
                self.login_deadline = Some(Instant::now() + self.config.request_timeout);
                sink.send(Message::Text(frame.into())).await?;
                debug!("Login request sent");
            }
        }
        Ok(())
    }

    /// Resolve requests (and a login) whose deadline has passed.
    pub(super) fn sweep_expired(&mut self) {
        let now = Instant::now();
        let expired = self.table.expire(now);
        if !expired.is_empty() {
            self.shared.stats.record_timeouts(expired.len());
            self.shared.stats.set_pending(self.table.len());
        }
        for pending in expired {
            let timeout = pending.timeout();
            warn!(
                request_id = %pending.id,
                action = %pending.action,
                timeout_ms = timeout.as_millis() as u64,
                "Request timed out"
            );
            pending
                .completion
                .complete(Err(ClientError::Timeout(timeout)), &self.shared.bridge);
        }

        if self.login_deadline.is_some_and(|deadline| deadline <= now) {
            self.login_deadline = None;
            self.shared.login.publish(
                LoginOutcome::Failed(ClientError::Timeout(self.config.request_timeout)),
                &self.shared.bridge,
            );
        }
    }
}

async fn sleep_until_opt(deadline: Option<time::Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
