//! Client session loop
//!
//! One [`ClientSession`] per accepted TCP client. Each chunk the client sends
//! is exchanged with the device bus and the reply chunk is written back
//! verbatim. When the bus is unreachable or silent the client simply gets no
//! reply for that chunk; the session stays open.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, error, info};

use super::{BridgeMetrics, ExchangeOutcome, MAX_CHUNK_SIZE, PrimaryBus, shutdown_signalled, to_hex};
use crate::error::BridgeError;

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Client closed its side
    PeerClosed,
    /// Client sent nothing within the timeout
    IdleTimeout,
    /// Client socket failed (read error or reply could not be written)
    ClientError,
    /// Bridge is shutting down
    Shutdown,
}

/// One inbound client connection
#[derive(Debug)]
pub struct ClientSession {
    socket: TcpStream,
    peer: SocketAddr,
    bus: Arc<PrimaryBus>,
    metrics: Arc<BridgeMetrics>,
    timeout: Duration,
    shutdown: watch::Receiver<bool>,
}

impl ClientSession {
    /// Wrap an accepted connection
    pub fn new(
        socket: TcpStream,
        peer: SocketAddr,
        bus: Arc<PrimaryBus>,
        metrics: Arc<BridgeMetrics>,
        timeout: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            socket,
            peer,
            bus,
            metrics,
            timeout,
            shutdown,
        }
    }

    /// Forward chunks until the client leaves, fails, idles out or the bridge stops
    pub async fn run(mut self) -> SessionEnd {
        info!(peer = %self.peer, "New TCP client connected");
        self.metrics.inc_active_sessions();

        let end = self.forward().await;

        // Flush whatever is buffered; the client may already be gone.
        let _ = self.socket.shutdown().await;
        self.metrics.dec_active_sessions();
        info!(peer = %self.peer, reason = ?end, "TCP client connection closed");
        end
    }

    async fn forward(&mut self) -> SessionEnd {
        let mut buf = [0u8; MAX_CHUNK_SIZE];

        loop {
            let chunk = tokio::select! {
                () = shutdown_signalled(&mut self.shutdown) => return SessionEnd::Shutdown,
                read = tokio::time::timeout(self.timeout, self.socket.read(&mut buf)) => match read {
                    Ok(Ok(0)) => {
                        info!(peer = %self.peer, "TCP client disconnected");
                        return SessionEnd::PeerClosed;
                    }
                    Ok(Ok(n)) => Bytes::copy_from_slice(&buf[..n]),
                    Ok(Err(e)) => {
                        error!(peer = %self.peer, error = %e, "Error reading from TCP client");
                        return SessionEnd::ClientError;
                    }
                    Err(_) => {
                        info!(peer = %self.peer, "TCP client timed out");
                        return SessionEnd::IdleTimeout;
                    }
                },
            };

            debug!(peer = %self.peer, bytes = chunk.len(), data = %to_hex(&chunk), "Received from TCP client");

            if let Err(e) = self.bus.ensure_connected().await {
                error!(peer = %self.peer, error = %e, "Cannot establish connection to primary gateway");
                continue;
            }

            // The bus stays held while the reply is written, so a client that
            // stops reading gets the same timeout as the device.
            let client = &mut self.socket;
            let write_timeout = self.timeout;
            let outcome = self
                .bus
                .exchange_and_relay(chunk, |reply| async move {
                    let write = async {
                        client.write_all(&reply).await?;
                        client.flush().await
                    };
                    match tokio::time::timeout(write_timeout, write).await {
                        Ok(written) => Ok(written?),
                        Err(_) => Err(BridgeError::timeout(
                            "client write",
                            write_timeout.as_millis() as u64,
                        )),
                    }
                })
                .await;

            match outcome {
                ExchangeOutcome::Relayed(_) => {
                    debug!(peer = %self.peer, "Sent response back to TCP client");
                }
                ExchangeOutcome::NoReply(_) | ExchangeOutcome::PrimaryFailed(_) => {}
                ExchangeOutcome::RelayFailed(e) => {
                    error!(peer = %self.peer, error = %e, "Error writing to TCP client");
                    return SessionEnd::ClientError;
                }
            }
        }
    }
}
