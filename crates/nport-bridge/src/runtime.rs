//! Bridge startup and shutdown
//!
//! [`Bridge::start`] connects the primary gateway (fatal on failure), tries the
//! secondary gateway once (non-fatal), binds the listener and spawns the
//! secondary loop and the accept loop. The returned [`RunningBridge`] owns
//! every task and tears them down in order.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Instrument, error, info, info_span, warn};

use crate::bridge::{
    BridgeMetrics, ClientListener, Endpoint, EndpointRole, MetricsSnapshot, PrimaryBus,
    RetryPolicy, SecondaryBridge, SessionEnd,
};
use crate::config::BridgeConfig;
use crate::error::BridgeResult;

/// Extra time granted to sessions beyond one exchange timeout at shutdown
const DRAIN_SLACK: Duration = Duration::from_secs(1);

/// A configured, not yet started bridge
#[derive(Debug, Clone)]
pub struct Bridge {
    config: BridgeConfig,
    retry_policy: RetryPolicy,
}

impl Bridge {
    /// Bridge with the default retry policy
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Override the secondary loop's pauses
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Connect, bind and spawn the forwarding tasks
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the primary gateway
    /// cannot be connected or the listen address cannot be bound. Nothing is
    /// left running in that case.
    pub async fn start(self) -> BridgeResult<RunningBridge> {
        self.config.validate()?;
        let timeout = self.config.timeout();

        info!(primary = %self.config.primary, "Primary gateway");
        info!(secondary = %self.config.secondary, "Secondary gateway");
        info!(listen = %self.config.listen, timeout_secs = self.config.timeout_secs, "Listener");

        let metrics = Arc::new(BridgeMetrics::new());
        let bus = Arc::new(PrimaryBus::new(
            Endpoint::new(EndpointRole::Primary, self.config.primary.clone(), timeout),
            timeout,
            Arc::clone(&metrics),
        ));

        if let Err(e) = bus.endpoint().connect().await {
            error!(error = %e, "Failed to connect to primary gateway, not starting");
            return Err(e);
        }

        let secondary = Arc::new(Endpoint::new(
            EndpointRole::Secondary,
            self.config.secondary.clone(),
            timeout,
        ));
        if let Err(e) = secondary.connect().await {
            warn!(error = %e, "Secondary gateway unavailable at startup, will keep retrying");
        }

        let bound = ClientListener::bind(
            &self.config.listen,
            Arc::clone(&bus),
            Arc::clone(&metrics),
            timeout,
        )
        .await
        .and_then(|listener| listener.local_addr().map(|addr| (addr, listener)));
        let (local_addr, listener) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                error!(error = %e, "Failed to start TCP listener");
                bus.endpoint().close().await;
                secondary.close().await;
                return Err(e);
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let secondary_loop = SecondaryBridge::new(
            Arc::clone(&secondary),
            Arc::clone(&bus),
            Arc::clone(&metrics),
            self.retry_policy,
        );
        let secondary_task = tokio::spawn(
            secondary_loop
                .run(shutdown_rx.clone())
                .instrument(info_span!("secondary")),
        );

        let accept_task = tokio::spawn(async move {
            let mut sessions = JoinSet::new();
            listener.run(&mut sessions, shutdown_rx).await;
            sessions
        });

        info!(%local_addr, "Bridge started");

        Ok(RunningBridge {
            local_addr,
            metrics,
            bus,
            secondary,
            shutdown_tx,
            accept_task,
            secondary_task,
            drain_grace: timeout.saturating_add(DRAIN_SLACK),
        })
    }
}

/// Handle to a started bridge
#[derive(Debug)]
pub struct RunningBridge {
    local_addr: SocketAddr,
    metrics: Arc<BridgeMetrics>,
    bus: Arc<PrimaryBus>,
    secondary: Arc<Endpoint>,
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<JoinSet<SessionEnd>>,
    secondary_task: JoinHandle<()>,
    drain_grace: Duration,
}

impl RunningBridge {
    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current traffic counters
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Serve until Ctrl+C or SIGTERM, then shut down
    pub async fn run_until_signal(self) -> MetricsSnapshot {
        wait_for_signal().await;
        self.shutdown().await
    }

    /// Stop accepting, let sessions finish, then close both gateways
    ///
    /// Sessions still running after the drain grace period are aborted.
    pub async fn shutdown(self) -> MetricsSnapshot {
        info!("Shutting down bridge");
        let _ = self.shutdown_tx.send(true);

        let mut sessions = match self.accept_task.await {
            Ok(sessions) => sessions,
            Err(e) => {
                error!(error = %e, "Accept loop task failed");
                JoinSet::new()
            }
        };

        let drained = tokio::time::timeout(self.drain_grace, async {
            while sessions.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = sessions.len(),
                grace_ms = self.drain_grace.as_millis() as u64,
                "Aborting sessions still running after drain grace period"
            );
            sessions.shutdown().await;
        }

        if let Err(e) = self.secondary_task.await {
            error!(error = %e, "Secondary bridge task failed");
        }

        self.bus.endpoint().close().await;
        self.secondary.close().await;

        let snapshot = self.metrics.snapshot();
        info!(
            relayed = snapshot.exchanges_relayed,
            unanswered = snapshot.exchanges_unanswered,
            failed = snapshot.exchanges_failed,
            bytes_to_bus = snapshot.bytes_to_bus,
            bytes_from_bus = snapshot.bytes_from_bus,
            reconnect_attempts = snapshot.reconnect_attempts,
            "Bridge stopped"
        );
        snapshot
    }
}

/// Resolves on Ctrl+C, or SIGTERM on unix
async fn wait_for_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl+C received, initiating shutdown"),
            Err(e) => {
                warn!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("SIGTERM received, initiating shutdown");
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointAddress;
    use crate::error::BridgeError;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    /// Gateway that accepts connections and echoes whatever arrives
    async fn echo_gateway() -> EndpointAddress {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    while let Ok(n) = socket.read(&mut buf).await {
                        if n == 0 || socket.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        EndpointAddress::new("127.0.0.1", port)
    }

    fn config(primary: EndpointAddress, secondary: EndpointAddress) -> BridgeConfig {
        BridgeConfig {
            primary,
            secondary,
            listen: EndpointAddress::new("127.0.0.1", 0),
            timeout_secs: 1,
        }
    }

    #[tokio::test]
    async fn test_primary_unreachable_is_fatal() {
        let primary = EndpointAddress::new("127.0.0.1", closed_port().await);
        let result = Bridge::new(config(primary, echo_gateway().await)).start().await;
        assert!(matches!(result, Err(BridgeError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_before_connecting() {
        for timeout_secs in [0, u64::MAX] {
            let mut config = config(echo_gateway().await, echo_gateway().await);
            config.timeout_secs = timeout_secs;
            let result = Bridge::new(config).start().await;
            assert!(
                matches!(result, Err(BridgeError::Configuration { .. })),
                "timeout_secs = {timeout_secs}"
            );
        }
    }

    #[tokio::test]
    async fn test_secondary_unreachable_is_not_fatal() {
        let secondary = EndpointAddress::new("127.0.0.1", closed_port().await);
        let bridge = Bridge::new(config(echo_gateway().await, secondary))
            .start()
            .await
            .unwrap();
        assert_ne!(bridge.local_addr().port(), 0);
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_listener() {
        let bridge = Bridge::new(config(echo_gateway().await, echo_gateway().await))
            .start()
            .await
            .unwrap();
        let addr = bridge.local_addr();

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");

        let snapshot = bridge.shutdown().await;
        assert_eq!(snapshot.exchanges_relayed, 1);
        assert_eq!(snapshot.active_sessions, 0);
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
