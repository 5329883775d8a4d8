//! Bus bridging core
//!
//! Everything that touches sockets lives here:
//!
//! - [`Endpoint`]: a reconnectable TCP connection to one serial gateway
//! - [`BusArbiter`]: the process-wide token that serializes bus access
//! - [`PrimaryBus`]: the primary endpoint plus arbiter, running exchanges
//! - [`ClientSession`] / [`ClientListener`]: inbound TCP clients
//! - [`SecondaryBridge`]: the loop serving the second bus participant
//! - [`BridgeMetrics`]: shared traffic counters

pub mod arbiter;
pub mod endpoint;
pub mod exchange;
pub mod listener;
pub mod metrics;
pub mod secondary;
pub mod session;

pub use arbiter::{BusArbiter, BusPermit};
pub use endpoint::{Endpoint, EndpointRole, ReadOutcome};
pub use exchange::{Exchange, ExchangeOutcome, PrimaryBus};
pub use listener::ClientListener;
pub use metrics::{BridgeMetrics, MetricsSnapshot};
pub use secondary::{RetryPolicy, SecondaryBridge};
pub use session::{ClientSession, SessionEnd};

use std::fmt::Write as _;

use tokio::sync::watch;

/// Largest chunk read from any socket in one go
pub const MAX_CHUNK_SIZE: usize = 1024;

/// Space-separated lowercase hex, used in debug logs
pub(crate) fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Resolves once shutdown has been requested
///
/// A dropped sender counts as shutdown.
pub(crate) async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[]), "");
        assert_eq!(to_hex(&[0x01, 0x03, 0xff]), "01 03 ff");
    }

    #[tokio::test]
    async fn test_shutdown_signalled() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        shutdown_signalled(&mut rx).await;
    }

    #[tokio::test]
    async fn test_dropped_sender_counts_as_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        shutdown_signalled(&mut rx).await;
    }
}
