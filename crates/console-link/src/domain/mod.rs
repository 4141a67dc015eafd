//! Domain types: everything that does not touch the socket.

pub mod config;
pub mod correlation;
pub mod credential;
pub mod envelope;
pub mod error;
pub mod pending;
pub mod state;
pub mod stats;
