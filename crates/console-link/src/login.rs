//! Login flow.
//!
//! Login runs outside the correlation table: the request carries no id and
//! at most one can be outstanding. While one is, the network context treats
//! the next id-less frame as its reply and publishes the outcome here.

use crate::bridge::{CompletionBridge, Observers};
use crate::domain::envelope::Response;
use crate::domain::error::ClientError;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Outcomes kept for subscribers that fall behind
const OUTCOME_BUFFER: usize = 16;

/// How a login attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum LoginOutcome {
    /// Server accepted; `user` is the profile it returned, if any
    Accepted { user: Option<Value> },
    /// Server answered `success: false`
    Rejected { message: String },
    /// No answer: not connected, connection lost, stopped or timed out
    Failed(ClientError),
}

impl LoginOutcome {
    pub fn from_response(response: Response) -> Self {
        if response.success {
            let user = response.field("user").cloned().or(response.data);
            LoginOutcome::Accepted { user }
        } else {
            LoginOutcome::Rejected {
                message: response
                    .error
                    .unwrap_or_else(|| "login rejected".to_owned()),
            }
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, LoginOutcome::Accepted { .. })
    }
}

/// Shared between the client handle and the network context.
pub(crate) struct LoginChannel {
    in_flight: AtomicBool,
    events: broadcast::Sender<LoginOutcome>,
    observers: Observers<LoginOutcome>,
}

impl LoginChannel {
    pub(crate) fn new() -> Self {
        let (events, _) = broadcast::channel(OUTCOME_BUFFER);
        Self {
            in_flight: AtomicBool::new(false),
            events,
            observers: Observers::new(),
        }
    }

    /// Claim the single login slot.
    pub(crate) fn begin(&self) -> Result<(), ClientError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| ClientError::LoginInProgress)
    }

    pub(crate) fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Release the slot and tell everyone how it went.
    pub(crate) fn publish(&self, outcome: LoginOutcome, bridge: &CompletionBridge) {
        self.in_flight.store(false, Ordering::Release);
        match &outcome {
            LoginOutcome::Accepted { .. } => info!("Login accepted"),
            LoginOutcome::Rejected { message } => warn!(reason = %message, "Login rejected"),
            LoginOutcome::Failed(e) => warn!(error = %e, "Login failed"),
        }
        if self.events.send(outcome.clone()).is_err() {
            debug!("No login subscribers");
        }
        self.observers.notify(outcome, bridge);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<LoginOutcome> {
        self.events.subscribe()
    }

    pub(crate) fn observe(&self, observer: impl Fn(LoginOutcome) + Send + Sync + 'static) {
        self.observers.add(observer);
    }
}
