//! Managed outbound connection to a serial device server
//!
//! An [`Endpoint`] owns at most one live `TcpStream` to its gateway. Every
//! failure (I/O error, timeout, peer close) drops the stream so that the next
//! caller of [`Endpoint::ensure_connected`] dials again.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::EndpointAddress;
use crate::error::{BridgeError, BridgeErrorExt, BridgeResult};

/// Which gateway an endpoint talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointRole {
    /// Gateway in front of the device bus
    Primary,
    /// Gateway in front of the second bus participant
    Secondary,
}

impl fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Secondary => f.write_str("secondary"),
        }
    }
}

/// Result of a bounded read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes arrived (possibly less than a full message)
    Data(Bytes),
    /// Peer closed the connection; the handle has been dropped
    Closed,
    /// Nothing arrived before the deadline
    TimedOut,
}

/// Outbound TCP connection with lazy reconnect
#[derive(Debug)]
pub struct Endpoint {
    role: EndpointRole,
    address: EndpointAddress,
    connect_timeout: Duration,
    /// Live stream, absent until connected and after any failure
    stream: Mutex<Option<TcpStream>>,
    /// Mirrors `stream.is_some()`; only written while `stream` is locked
    connected: AtomicBool,
    connect_attempts: AtomicU64,
}

impl Endpoint {
    /// Create an endpoint in the disconnected state
    pub fn new(role: EndpointRole, address: EndpointAddress, connect_timeout: Duration) -> Self {
        Self {
            role,
            address,
            connect_timeout,
            stream: Mutex::new(None),
            connected: AtomicBool::new(false),
            connect_attempts: AtomicU64::new(0),
        }
    }

    /// Gateway role
    pub fn role(&self) -> EndpointRole {
        self.role
    }

    /// Number of connection attempts made so far
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    /// Whether a connection handle is currently held
    ///
    /// Never waits for a read or write in progress on the handle.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Drop the handle held in `slot`; caller holds the slot lock
    fn clear(&self, slot: &mut Option<TcpStream>) -> Option<TcpStream> {
        self.connected.store(false, Ordering::Release);
        slot.take()
    }

    /// Open a fresh connection, replacing any existing handle
    ///
    /// The dial itself happens without holding the handle lock, so a slow
    /// gateway never blocks readers of the current stream.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Connect` when the dial fails or exceeds the
    /// connect timeout.
    pub async fn connect(&self) -> BridgeResult<()> {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
        info!(endpoint = %self.role, address = %self.address, "Connecting to gateway");

        let dial = TcpStream::connect((self.address.host.as_str(), self.address.port));
        let stream = match tokio::time::timeout(self.connect_timeout, dial).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(endpoint = %self.role, address = %self.address, error = %e, "Gateway connect failed");
                return Err(BridgeError::connect(self.role, e.to_string()));
            }
            Err(_) => {
                warn!(endpoint = %self.role, address = %self.address, "Gateway connect timed out");
                return Err(BridgeError::connect(
                    self.role,
                    format!("timed out after {}ms", self.connect_timeout.as_millis()),
                ));
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(endpoint = %self.role, error = %e, "Could not set TCP_NODELAY");
        }

        let mut slot = self.stream.lock().await;
        *slot = Some(stream);
        self.connected.store(true, Ordering::Release);
        drop(slot);
        info!(endpoint = %self.role, address = %self.address, "Connected to gateway");
        Ok(())
    }

    /// Connect only if no handle is held
    ///
    /// Makes a single attempt; retry cadence is the caller's decision.
    ///
    /// # Errors
    ///
    /// Propagates the failure of [`Endpoint::connect`].
    pub async fn ensure_connected(&self) -> BridgeResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        warn!(endpoint = %self.role, "Gateway not connected, attempting to reconnect");
        self.connect().await
    }

    /// Write all bytes and flush within `timeout`
    ///
    /// # Errors
    ///
    /// `NotConnected` without a handle; `EndpointIo` or `Timeout` otherwise.
    /// The handle is dropped on either failure.
    pub async fn write_and_flush(&self, bytes: &[u8], timeout: Duration) -> BridgeResult<()> {
        let mut slot = self.stream.lock().await;
        let stream = slot
            .as_mut()
            .ok_or_else(|| BridgeError::not_connected(self.role))?;

        let write = async {
            stream.write_all(bytes).await?;
            stream.flush().await
        };

        let result = match tokio::time::timeout(timeout, write).await {
            Ok(result) => result.endpoint_context(self.role, "write"),
            Err(_) => Err(BridgeError::timeout(
                format!("{} write", self.role),
                timeout.as_millis() as u64,
            )),
        };

        if result.is_err() {
            self.clear(&mut slot);
        } else {
            debug!(endpoint = %self.role, bytes = bytes.len(), "Wrote to gateway");
        }
        result
    }

    /// Read up to `max_bytes` within `timeout`
    ///
    /// A timeout is not an error: it yields [`ReadOutcome::TimedOut`] and keeps
    /// the handle. A peer close yields [`ReadOutcome::Closed`] and drops it.
    ///
    /// # Errors
    ///
    /// `NotConnected` without a handle; `EndpointIo` on a socket error, which
    /// also drops the handle.
    pub async fn read(&self, max_bytes: usize, timeout: Duration) -> BridgeResult<ReadOutcome> {
        let mut slot = self.stream.lock().await;
        let stream = slot
            .as_mut()
            .ok_or_else(|| BridgeError::not_connected(self.role))?;

        let mut buf = vec![0u8; max_bytes];
        let read = tokio::time::timeout(timeout, stream.read(&mut buf)).await;
        match read {
            Ok(Ok(0)) => {
                self.clear(&mut slot);
                Ok(ReadOutcome::Closed)
            }
            Ok(Ok(n)) => {
                debug!(endpoint = %self.role, bytes = n, "Read from gateway");
                buf.truncate(n);
                Ok(ReadOutcome::Data(Bytes::from(buf)))
            }
            Ok(Err(e)) => {
                self.clear(&mut slot);
                Err(BridgeError::endpoint_io(self.role, "read", e))
            }
            Err(_) => Ok(ReadOutcome::TimedOut),
        }
    }

    /// Shut the connection down; idempotent
    pub async fn close(&self) {
        let stream = {
            let mut slot = self.stream.lock().await;
            self.clear(&mut slot)
        };
        if let Some(mut stream) = stream {
            // A broken connection may refuse the shutdown; nothing to do about it.
            let _ = stream.shutdown().await;
            info!(endpoint = %self.role, "Gateway connection closed");
        }
    }
}
