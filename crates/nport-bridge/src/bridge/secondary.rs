//! Secondary bridge loop
//!
//! Forwards every chunk the second bus participant sends to the device bus and
//! writes the device's reply back to it. The loop never gives up: failures on
//! the secondary side lead to a pause and a reconnect, failures on the primary
//! side drop the primary handle for the next user to re-establish.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{
    BridgeMetrics, Endpoint, ExchangeOutcome, MAX_CHUNK_SIZE, PrimaryBus, ReadOutcome,
    shutdown_signalled, to_hex,
};

/// Fixed pauses used by the secondary loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause after a failed secondary connect
    pub reconnect_backoff: Duration,
    /// Pause after the secondary gateway closed or failed
    pub closed_pause: Duration,
    /// Read timeout on the secondary gateway; bounds how long one poll waits
    pub poll_interval: Duration,
    /// Pause when the primary gateway cannot be connected
    pub primary_unavailable_pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            reconnect_backoff: Duration::from_secs(5),
            closed_pause: Duration::from_secs(1),
            poll_interval: Duration::from_secs(1),
            primary_unavailable_pause: Duration::from_secs(1),
        }
    }
}

/// Next thing the loop does
#[derive(Debug, Clone, PartialEq, Eq)]
enum SecondaryStep {
    /// Make sure the secondary gateway is connected
    Connect,
    /// Poll the secondary gateway for a chunk
    Read,
    /// Exchange a received chunk with the bus; never interrupted by shutdown
    Forward(Bytes),
    /// Sleep, then go back to `Connect`
    Pause(Duration),
}

/// Long-running secondary → primary forwarder
#[derive(Debug)]
pub struct SecondaryBridge {
    secondary: Arc<Endpoint>,
    bus: Arc<PrimaryBus>,
    metrics: Arc<BridgeMetrics>,
    policy: RetryPolicy,
}

impl SecondaryBridge {
    /// Create the loop; the secondary endpoint may still be disconnected
    pub fn new(
        secondary: Arc<Endpoint>,
        bus: Arc<PrimaryBus>,
        metrics: Arc<BridgeMetrics>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            secondary,
            bus,
            metrics,
            policy,
        }
    }

    /// Run until shutdown is signalled
    ///
    /// Shutdown is observed while connecting, pausing or polling. An exchange
    /// already under way finishes and its reply is relayed first.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting secondary to primary bridge");

        let mut step = SecondaryStep::Connect;
        loop {
            step = match step {
                SecondaryStep::Forward(chunk) => self.forward(chunk).await,
                idle => tokio::select! {
                    () = shutdown_signalled(&mut shutdown) => break,
                    next = self.step(idle) => next,
                },
            };
        }

        info!("Secondary bridge stopped");
    }

    async fn step(&self, step: SecondaryStep) -> SecondaryStep {
        match step {
            SecondaryStep::Connect => self.connect().await,
            SecondaryStep::Read => self.poll().await,
            SecondaryStep::Forward(chunk) => self.forward(chunk).await,
            SecondaryStep::Pause(duration) => {
                tokio::time::sleep(duration).await;
                SecondaryStep::Connect
            }
        }
    }

    async fn connect(&self) -> SecondaryStep {
        if self.secondary.is_connected() {
            return SecondaryStep::Read;
        }

        self.metrics.inc_reconnect_attempts();
        match self.secondary.ensure_connected().await {
            Ok(()) => SecondaryStep::Read,
            Err(e) => {
                warn!(error = %e, backoff_ms = self.policy.reconnect_backoff.as_millis() as u64, "Secondary gateway unavailable");
                SecondaryStep::Pause(self.policy.reconnect_backoff)
            }
        }
    }

    async fn poll(&self) -> SecondaryStep {
        let chunk = match self
            .secondary
            .read(MAX_CHUNK_SIZE, self.policy.poll_interval)
            .await
        {
            Ok(ReadOutcome::Data(chunk)) => chunk,
            Ok(ReadOutcome::TimedOut) => return SecondaryStep::Read,
            Ok(ReadOutcome::Closed) => {
                warn!("Secondary gateway connection closed, reconnecting");
                return SecondaryStep::Pause(self.policy.closed_pause);
            }
            Err(e) => {
                error!(error = %e, "Error in secondary to primary bridge");
                self.secondary.close().await;
                return SecondaryStep::Pause(self.policy.closed_pause);
            }
        };

        debug!(bytes = chunk.len(), data = %to_hex(&chunk), "Received from secondary gateway");
        SecondaryStep::Forward(chunk)
    }

    async fn forward(&self, chunk: Bytes) -> SecondaryStep {
        if let Err(e) = self.bus.ensure_connected().await {
            error!(error = %e, "Cannot establish connection to primary gateway");
            return SecondaryStep::Pause(self.policy.primary_unavailable_pause);
        }

        let secondary = &self.secondary;
        let outcome = self
            .bus
            .exchange_and_relay(chunk, |reply| async move {
                if !secondary.is_connected() {
                    debug!("Secondary gateway gone, dropping bus reply");
                    return Ok(());
                }
                secondary
                    .write_and_flush(&reply, self.bus.timeout())
                    .await
            })
            .await;

        match outcome {
            ExchangeOutcome::Relayed(_) => {
                debug!("Sent response back to secondary gateway");
                SecondaryStep::Read
            }
            ExchangeOutcome::NoReply(_) | ExchangeOutcome::PrimaryFailed(_) => SecondaryStep::Read,
            ExchangeOutcome::RelayFailed(e) => {
                error!(error = %e, "Error writing to secondary gateway");
                self.secondary.close().await;
                SecondaryStep::Pause(self.policy.closed_pause)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::EndpointRole;
    use crate::config::EndpointAddress;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const TIMEOUT: Duration = Duration::from_millis(500);

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            reconnect_backoff: Duration::from_millis(50),
            closed_pause: Duration::from_millis(20),
            poll_interval: Duration::from_millis(50),
            primary_unavailable_pause: Duration::from_millis(20),
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.reconnect_backoff, Duration::from_secs(5));
        assert_eq!(policy.closed_pause, Duration::from_secs(1));
        assert_eq!(policy.poll_interval, Duration::from_secs(1));
        assert_eq!(policy.primary_unavailable_pause, Duration::from_secs(1));
    }

    /// Primary device answering `req` with `req` prefixed by 0xAA
    async fn primary_device() -> EndpointAddress {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    while let Ok(n) = socket.read(&mut buf).await {
                        if n == 0 {
                            break;
                        }
                        let mut reply = vec![0xAA];
                        reply.extend_from_slice(&buf[..n]);
                        if socket.write_all(&reply).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        EndpointAddress::new("127.0.0.1", port)
    }

    fn bridge(
        primary: EndpointAddress,
        secondary: EndpointAddress,
    ) -> (SecondaryBridge, Arc<Endpoint>, Arc<PrimaryBus>) {
        let metrics = Arc::new(BridgeMetrics::new());
        let bus = Arc::new(PrimaryBus::new(
            Endpoint::new(EndpointRole::Primary, primary, TIMEOUT),
            TIMEOUT,
            Arc::clone(&metrics),
        ));
        let secondary = Arc::new(Endpoint::new(EndpointRole::Secondary, secondary, TIMEOUT));
        let bridge = SecondaryBridge::new(
            Arc::clone(&secondary),
            Arc::clone(&bus),
            metrics,
            fast_policy(),
        );
        (bridge, secondary, bus)
    }

    #[tokio::test]
    async fn test_forwards_and_replies() {
        let participant = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let secondary_addr =
            EndpointAddress::new("127.0.0.1", participant.local_addr().unwrap().port());
        let (bridge, _, _) = bridge(primary_device().await, secondary_addr);

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(bridge.run(rx));

        let (mut socket, _) = participant.accept().await.unwrap();
        socket.write_all(&[0x02, 0x04]).await.unwrap();
        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(2), socket.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], &[0xAA, 0x02, 0x04]);

        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnects_after_secondary_drop() {
        let participant = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let secondary_addr =
            EndpointAddress::new("127.0.0.1", participant.local_addr().unwrap().port());
        let (bridge, secondary, _) = bridge(primary_device().await, secondary_addr);

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(bridge.run(rx));

        let (first, _) = participant.accept().await.unwrap();
        drop(first);

        let (mut second, _) = tokio::time::timeout(Duration::from_secs(2), participant.accept())
            .await
            .expect("secondary loop did not reconnect")
            .unwrap();
        second.write_all(b"hi").await.unwrap();
        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(2), second.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"\xAAhi");
        assert!(secondary.connect_attempts() >= 2);

        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_keeps_retrying_unreachable_secondary() {
        let participant = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = participant.local_addr().unwrap().port();
        drop(participant);

        let (bridge, secondary, _) =
            bridge(primary_device().await, EndpointAddress::new("127.0.0.1", port));

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(bridge.run(rx));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(secondary.connect_attempts() >= 2);
        assert!(!task.is_finished());

        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_lets_exchange_in_flight_finish() {
        let slow = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let primary = EndpointAddress::new("127.0.0.1", slow.local_addr().unwrap().port());
        tokio::spawn(async move {
            let (mut socket, _) = slow.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            tokio::time::sleep(Duration::from_millis(400)).await;
            socket.write_all(&buf[..n]).await.unwrap();
            let _ = socket.read(&mut buf).await;
        });

        let participant = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let secondary_addr =
            EndpointAddress::new("127.0.0.1", participant.local_addr().unwrap().port());
        let (bridge, _, bus) = bridge(primary, secondary_addr);

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(bridge.run(rx));

        let (mut socket, _) = participant.accept().await.unwrap();
        socket.write_all(b"slow").await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(bus.arbiter().is_busy());
        tx.send(true).unwrap();

        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(2), socket.read(&mut buf))
            .await
            .expect("reply dropped on shutdown")
            .unwrap();
        assert_eq!(&buf[..n], b"slow");

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("secondary loop did not stop")
            .unwrap();
        assert!(!bus.arbiter().is_busy());
    }

    #[tokio::test]
    async fn test_primary_failure_keeps_secondary() {
        let participant = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let secondary_addr =
            EndpointAddress::new("127.0.0.1", participant.local_addr().unwrap().port());

        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = EndpointAddress::new("127.0.0.1", dead.local_addr().unwrap().port());
        drop(dead);

        let (bridge, secondary, bus) = bridge(dead_addr, secondary_addr);
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(bridge.run(rx));

        let (mut socket, _) = participant.accept().await.unwrap();
        socket.write_all(b"req").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(bus.endpoint().connect_attempts() >= 1);
        assert!(secondary.is_connected());
        assert_eq!(secondary.connect_attempts(), 1);

        tx.send(true).unwrap();
        task.await.unwrap();
    }
}
