//! Correlation table: requests awaiting their response.
//!
//! Owned by the network context alone, so it is a plain map with no
//! locking. Every entry leaves the table exactly once, through
//! [`take`](PendingTable::take), [`expire`](PendingTable::expire) or
//! [`drain`](PendingTable::drain), and its completion is consumed when it
//! does.

use crate::bridge::CompletionBridge;
use crate::domain::correlation::RequestId;
use crate::domain::envelope::Response;
use crate::domain::error::ClientError;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Stand-in deadline for timeouts too large to represent
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// What a request resolves to
pub type RequestResult = Result<Response, ClientError>;

/// Callback form of a completion, run on the caller context
pub type ResponseHandler = Box<dyn FnOnce(RequestResult) + Send + 'static>;

/// Where a request's outcome goes.
pub enum Completion {
    /// Awaited through a [`crate::PendingResponse`]
    Channel(oneshot::Sender<RequestResult>),
    /// Invoked through the completion bridge
    Callback(ResponseHandler),
}

impl Completion {
    /// Hand the outcome over. Returns `false` if nobody was listening.
    pub fn complete(self, result: RequestResult, bridge: &CompletionBridge) -> bool {
        match self {
            Completion::Channel(tx) => tx.send(result).is_ok(),
            Completion::Callback(handler) => bridge.deliver(handler, result),
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Channel(_) => f.write_str("Completion::Channel"),
            Completion::Callback(_) => f.write_str("Completion::Callback"),
        }
    }
}

/// One in-flight request
#[derive(Debug)]
pub struct PendingRequest {
    pub id: RequestId,
    /// Action name (for logging)
    pub action: String,
    pub completion: Completion,
    pub created_at: Instant,
    pub deadline: Instant,
}

impl PendingRequest {
    /// Entry created now, due `timeout` from now.
    pub fn new(
        id: RequestId,
        action: impl Into<String>,
        completion: Completion,
        timeout: Duration,
    ) -> Self {
        let created_at = Instant::now();
        Self {
            id,
            action: action.into(),
            completion,
            created_at,
            deadline: created_at
                .checked_add(timeout)
                .unwrap_or_else(|| created_at + FAR_FUTURE),
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline <= now
    }

    /// The timeout this entry was created with
    pub fn timeout(&self) -> Duration {
        self.deadline.saturating_duration_since(self.created_at)
    }
}

/// Map of request id to in-flight request.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: HashMap<RequestId, PendingRequest>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry. A request whose id is already pending is handed back.
    pub fn insert(&mut self, request: PendingRequest) -> Result<(), PendingRequest> {
        if self.entries.contains_key(&request.id) {
            return Err(request);
        }
        self.entries.insert(request.id, request);
        Ok(())
    }

    /// Remove the entry for `id`, if any.
    pub fn take(&mut self, id: &RequestId) -> Option<PendingRequest> {
        self.entries.remove(id)
    }

    /// Remove and return every entry whose deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Vec<PendingRequest> {
        let expired: Vec<RequestId> = self
            .entries
            .values()
            .filter(|req| req.is_expired(now))
            .map(|req| req.id)
            .collect();
        expired
            .iter()
            .filter_map(|id| self.entries.remove(id))
            .collect()
    }

    /// Remove and return everything.
    pub fn drain(&mut self) -> Vec<PendingRequest> {
        self.entries.drain().map(|(_, req)| req).collect()
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
