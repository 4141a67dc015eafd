//! Per-client counters.
//!
//! Each `record_*` call bumps this client's own atomic and the matching
//! process-wide Prometheus metric.

use console_telemetry::{metric_inc, metrics};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Statistics for one client instance
#[derive(Debug, Default)]
pub struct ClientStats {
    requests_sent: AtomicU64,
    responses_delivered: AtomicU64,
    orphaned_responses: AtomicU64,
    malformed_frames: AtomicU64,
    timeouts: AtomicU64,
    abandoned: AtomicU64,
    rejected_offline: AtomicU64,
    connect_attempts: AtomicU64,
    connections_established: AtomicU64,
    connections_lost: AtomicU64,
    pending: AtomicUsize,
}

/// Point-in-time copy of [`ClientStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    pub requests_sent: u64,
    pub responses_delivered: u64,
    pub orphaned_responses: u64,
    pub malformed_frames: u64,
    pub timeouts: u64,
    /// Failed by connection loss or stop
    pub abandoned: u64,
    /// Rejected with `NotConnected`
    pub rejected_offline: u64,
    pub connect_attempts: u64,
    pub connections_established: u64,
    pub connections_lost: u64,
    pub pending: usize,
}

impl ClientStats {
    pub fn record_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        metric_inc!(REQUESTS_SENT);
    }

    pub fn record_delivered(&self, latency: Duration) {
        self.responses_delivered.fetch_add(1, Ordering::Relaxed);
        metric_inc!(RESPONSES_DELIVERED);
        metrics::RESPONSE_LATENCY.observe(latency.as_secs_f64());
    }

    pub fn record_orphan(&self) {
        self.orphaned_responses.fetch_add(1, Ordering::Relaxed);
        metric_inc!(ORPHANED_RESPONSES);
    }

    pub fn record_malformed(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
        metric_inc!(MALFORMED_FRAMES);
    }

    pub fn record_timeouts(&self, count: usize) {
        self.timeouts.fetch_add(count as u64, Ordering::Relaxed);
        metrics::REQUEST_TIMEOUTS.inc_by(count as f64);
    }

    pub fn record_abandoned(&self, count: usize) {
        self.abandoned.fetch_add(count as u64, Ordering::Relaxed);
        metrics::REQUESTS_ABANDONED.inc_by(count as f64);
    }

    pub fn record_rejected_offline(&self) {
        self.rejected_offline.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
        metric_inc!(CONNECT_ATTEMPTS);
    }

    pub fn record_connected(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        metrics::CONNECTED.set(1.0);
    }

    /// The connection is down. `lost` is false for a handshake that never
    /// completed and for a close we asked for.
    pub fn record_disconnected(&self, lost: bool) {
        if lost {
            self.connections_lost.fetch_add(1, Ordering::Relaxed);
            metric_inc!(CONNECTIONS_LOST);
        }
        metrics::CONNECTED.set(0.0);
    }

    /// Publish the correlation table size.
    pub fn set_pending(&self, pending: usize) {
        self.pending.store(pending, Ordering::Relaxed);
        metrics::PENDING_REQUESTS.set(pending as f64);
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            responses_delivered: self.responses_delivered.load(Ordering::Relaxed),
            orphaned_responses: self.orphaned_responses.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            rejected_offline: self.rejected_offline.load(Ordering::Relaxed),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connections_established: self.connections_established.load(Ordering::Relaxed),
            connections_lost: self.connections_lost.load(Ordering::Relaxed),
            pending: self.pending(),
        }
    }
}
