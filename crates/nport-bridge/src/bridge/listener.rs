//! Inbound TCP listener
//!
//! Accepts clients and spawns one [`ClientSession`] per connection into a
//! `JoinSet` owned by the caller, so shutdown can wait for them.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span};

use super::{BridgeMetrics, ClientSession, PrimaryBus, SessionEnd, shutdown_signalled};
use crate::config::EndpointAddress;
use crate::error::{BridgeError, BridgeResult};

/// Pause after a failed `accept` (e.g. file descriptor exhaustion)
const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(100);

/// Listener for bridge clients
#[derive(Debug)]
pub struct ClientListener {
    listener: TcpListener,
    bus: Arc<PrimaryBus>,
    metrics: Arc<BridgeMetrics>,
    timeout: Duration,
}

impl ClientListener {
    /// Bind the listen address
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Bind` if the address is unavailable.
    pub async fn bind(
        address: &EndpointAddress,
        bus: Arc<PrimaryBus>,
        metrics: Arc<BridgeMetrics>,
        timeout: Duration,
    ) -> BridgeResult<Self> {
        let listener = TcpListener::bind((address.host.as_str(), address.port))
            .await
            .map_err(|source| BridgeError::Bind {
                address: address.to_string(),
                source,
            })?;

        Ok(Self {
            listener,
            bus,
            metrics,
            timeout,
        })
    }

    /// Actual bound address
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the socket has no local address.
    pub fn local_addr(&self) -> BridgeResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept clients until shutdown is signalled
    ///
    /// Sessions keep running after this returns; they observe the same
    /// shutdown signal on their own.
    pub async fn run(
        self,
        sessions: &mut JoinSet<SessionEnd>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        if let Ok(addr) = self.listener.local_addr() {
            info!("TCP server listening on {}", addr);
        }

        let mut next_session_id: u64 = 0;
        loop {
            tokio::select! {
                () = shutdown_signalled(&mut shutdown) => {
                    info!("TCP listener received shutdown signal");
                    break;
                }

                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        next_session_id += 1;
                        if let Err(e) = socket.set_nodelay(true) {
                            debug!(peer = %peer, error = %e, "Could not set TCP_NODELAY");
                        }

                        let session = ClientSession::new(
                            socket,
                            peer,
                            Arc::clone(&self.bus),
                            Arc::clone(&self.metrics),
                            self.timeout,
                            shutdown.clone(),
                        );
                        let span = info_span!("session", id = next_session_id, peer = %peer);
                        sessions.spawn(session.run().instrument(span));
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept TCP connection");
                        tokio::time::sleep(ACCEPT_ERROR_PAUSE).await;
                    }
                },
            }

            // Reap finished sessions so the set does not grow without bound.
            while sessions.try_join_next().is_some() {}
        }
    }
}
