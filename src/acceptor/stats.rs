//! Acceptor statistics
//!
//! Every outcome is counted twice: in per-acceptor atomics (so independent
//! acceptors never share numbers) and through the `metrics` facade for
//! whatever recorder the process installs.

use metrics::{counter, gauge};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use super::pending::CloseReason;

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Connections accepted from the listener
    pub accepted: u64,
    /// Connections handed to a detector
    pub handed_off: u64,
    /// Connections whose TLS handshake failed
    pub handshake_failures: u64,
    /// Connections evicted by the detection timeout
    pub timed_out: u64,
    /// Connections closed because their buffer matched nothing
    pub unmatched: u64,
    /// Connections closed by the peer or by an I/O error while pending
    pub disconnected: u64,
    /// Connections currently pending
    pub pending: u64,
}

/// Live counters shared between an acceptor and its handles
#[derive(Debug, Default)]
pub(crate) struct AcceptorStats {
    accepted: AtomicU64,
    handed_off: AtomicU64,
    handshake_failures: AtomicU64,
    timed_out: AtomicU64,
    unmatched: AtomicU64,
    disconnected: AtomicU64,
    pending: AtomicU64,
}

impl AcceptorStats {
    pub(crate) fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        counter!("protocol_acceptor.connections.accepted").increment(1);
    }

    pub(crate) fn record_handoff(&self, detector: &str) {
        self.handed_off.fetch_add(1, Ordering::Relaxed);
        counter!("protocol_acceptor.connections.handed_off", "detector" => detector.to_string())
            .increment(1);
    }

    pub(crate) fn record_closed(&self, reason: &CloseReason) {
        let (slot, label) = match reason {
            CloseReason::HandshakeFailure(_) => (&self.handshake_failures, "handshake_failure"),
            CloseReason::DetectionTimeout(_) => (&self.timed_out, "timeout"),
            CloseReason::NoProtocolMatch(_) => (&self.unmatched, "no_match"),
            CloseReason::Disconnected | CloseReason::Io(_) => (&self.disconnected, "disconnected"),
        };
        slot.fetch_add(1, Ordering::Relaxed);
        counter!("protocol_acceptor.connections.closed", "reason" => label).increment(1);
    }

    pub(crate) fn set_pending(&self, pending: usize) {
        self.pending.store(pending as u64, Ordering::Relaxed);
        gauge!("protocol_acceptor.connections.pending").set(pending as f64);
    }

    /// Copy the current values
    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            handed_off: self.handed_off.load(Ordering::Relaxed),
            handshake_failures: self.handshake_failures.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            unmatched: self.unmatched.load(Ordering::Relaxed),
            disconnected: self.disconnected.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
        }
    }
}
