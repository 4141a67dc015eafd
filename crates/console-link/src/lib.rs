//! # Console Link
//!
//! Asynchronous request/response client for the NetConsole management
//! server.
//!
//! ## Architecture
//!
//! ```text
//! caller context                         console-net thread
//! ──────────────                         ──────────────────
//! ConsoleClient::send_request ──Command──▶ NetworkActor
//!        │                                  ├─ correlation table (sole owner)
//!        │                                  ├─ WebSocket session
//!        │                                  └─ supervisor: connect/backoff
//! PendingResponse ◀──── oneshot ────────────┤
//! CallerQueue::run_pending ◀── bridge ──────┘ callbacks, observers
//! ```
//!
//! - Each request gets a fresh [`RequestId`]; its table entry is created on
//!   the network thread before the frame is written.
//! - Every entry is resolved exactly once: by its response, by its deadline
//!   ([`ClientError::Timeout`]), by connection loss
//!   ([`ClientError::ConnectionLost`]) or by [`ConsoleClient::stop`]
//!   ([`ClientError::Stopped`]).
//! - Responses with unknown ids are dropped, logged and counted.
//! - Login is uncorrelated: one at a time, its outcome is broadcast.
//!
//! ## Example
//!
//! ```rust,ignore
//! use console_link::{actions, completion_bridge, ClientConfig, ConsoleClient, Credential};
//!
//! let (bridge, mut queue) = completion_bridge();
//! let client = ConsoleClient::new(ClientConfig::default(), bridge)?;
//! client.on_connectivity(|state| println!("connection: {state}"));
//! client.start()?;
//!
//! let credential = Credential::from_password("alice", password)?;
//! if client.login(&credential).await.is_accepted() {
//!     let models = client.send_request(actions::LIST_MODELS, ())?.await?;
//! }
//! queue.run_pending();
//! client.stop();
//! ```

pub mod bridge;
mod client;
pub mod domain;
pub mod login;
mod network;

pub use bridge::{completion_bridge, CallerQueue, CompletionBridge};
pub use client::{ConsoleClient, PendingResponse};
pub use domain::config::{BackoffPolicy, ClientConfig};
pub use domain::correlation::RequestId;
pub use domain::credential::{hash_password, Credential, CredentialRecord, CredentialStore};
pub use domain::envelope::{actions, InboundFrame, Request, Response};
pub use domain::error::{ClientError, ConfigError, CredentialError, ProtocolError, RemoteError};
pub use domain::pending::{PendingTable, RequestResult};
pub use domain::state::ConnectionState;
pub use domain::stats::StatsSnapshot;
pub use login::LoginOutcome;
pub use network::NETWORK_THREAD_NAME;
