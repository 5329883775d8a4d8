//! Bridge metrics collection
//!
//! Lock-free counters shared by every session and the secondary loop.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free atomic counters for bus traffic
#[derive(Debug, Default)]
pub struct BridgeMetrics {
    /// Exchanges whose reply reached the requester
    exchanges_relayed: AtomicU64,

    /// Exchanges where the device stayed silent until the timeout
    exchanges_unanswered: AtomicU64,

    /// Exchanges aborted by a primary write/read failure or a failed relay
    exchanges_failed: AtomicU64,

    /// Bytes written to the device bus
    bytes_to_bus: AtomicU64,

    /// Bytes read back from the device bus
    bytes_from_bus: AtomicU64,

    /// Client sessions currently open
    active_sessions: AtomicU64,

    /// Reconnect attempts made by the forwarding loops
    reconnect_attempts: AtomicU64,
}

impl BridgeMetrics {
    /// Create a new metrics collector with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a relayed exchange
    pub fn inc_exchanges_relayed(&self) {
        self.exchanges_relayed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an exchange that got no reply
    pub fn inc_exchanges_unanswered(&self) {
        self.exchanges_unanswered.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failed exchange
    pub fn inc_exchanges_failed(&self) {
        self.exchanges_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Add bytes written to the bus
    pub fn add_bytes_to_bus(&self, bytes: u64) {
        self.bytes_to_bus.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Add bytes read from the bus
    pub fn add_bytes_from_bus(&self, bytes: u64) {
        self.bytes_from_bus.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Increment active sessions counter
    pub fn inc_active_sessions(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement active sessions counter
    pub fn dec_active_sessions(&self) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    /// Count a reconnect attempt
    pub fn inc_reconnect_attempts(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of current metrics
    ///
    /// Each counter is read atomically, the set as a whole is not.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            exchanges_relayed: self.exchanges_relayed.load(Ordering::Relaxed),
            exchanges_unanswered: self.exchanges_unanswered.load(Ordering::Relaxed),
            exchanges_failed: self.exchanges_failed.load(Ordering::Relaxed),
            bytes_to_bus: self.bytes_to_bus.load(Ordering::Relaxed),
            bytes_from_bus: self.bytes_from_bus.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of bridge metrics at a point in time
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// Exchanges whose reply reached the requester
    pub exchanges_relayed: u64,

    /// Exchanges without a device reply
    pub exchanges_unanswered: u64,

    /// Exchanges that failed on the bus or during relay
    pub exchanges_failed: u64,

    /// Bytes written to the device bus
    pub bytes_to_bus: u64,

    /// Bytes read from the device bus
    pub bytes_from_bus: u64,

    /// Currently open client sessions
    pub active_sessions: u64,

    /// Reconnect attempts by the forwarding loops
    pub reconnect_attempts: u64,
}

impl MetricsSnapshot {
    /// All exchanges attempted against the bus
    pub fn total_exchanges(&self) -> u64 {
        self.exchanges_relayed + self.exchanges_unanswered + self.exchanges_failed
    }
}
