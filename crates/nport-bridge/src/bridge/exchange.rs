//! Request/response cycles against the device bus
//!
//! [`PrimaryBus`] bundles the primary endpoint with the bus arbiter. Both
//! forwarding loops call [`PrimaryBus::exchange_and_relay`], which writes one
//! chunk, waits for one reply chunk and hands it to the requester, all while
//! holding the bus.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::{BridgeMetrics, BusArbiter, Endpoint, MAX_CHUNK_SIZE, ReadOutcome, to_hex};
use crate::error::{BridgeError, BridgeResult};

const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// One request/response cycle; never outlives the forwarding of its reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// Bytes written to the bus
    pub request: Bytes,
    /// Reply chunk, if the device answered in time
    pub response: Option<Bytes>,
    /// Instant after which a reply is no longer awaited
    pub deadline: Instant,
}

impl Exchange {
    /// Start an exchange whose request has just been written
    ///
    /// A timeout too large to represent leaves the deadline at the latest
    /// representable instant.
    pub fn sent(request: Bytes, reply_timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            request,
            response: None,
            deadline: now
                .checked_add(reply_timeout)
                .unwrap_or_else(|| now + FAR_FUTURE),
        }
    }

    /// Time left before the reply deadline
    pub fn time_left(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// How an exchange ended
#[derive(Debug)]
pub enum ExchangeOutcome {
    /// The device replied and the reply was handed to the requester
    Relayed(Exchange),
    /// The device stayed silent until the deadline
    NoReply(Exchange),
    /// Writing to or reading from the primary gateway failed; its handle is gone
    PrimaryFailed(BridgeError),
    /// The device replied but the requester could not take the reply
    RelayFailed(BridgeError),
}

/// The primary endpoint guarded by the bus arbiter
#[derive(Debug)]
pub struct PrimaryBus {
    endpoint: Endpoint,
    arbiter: BusArbiter,
    timeout: Duration,
    metrics: Arc<BridgeMetrics>,
}

impl PrimaryBus {
    /// Wrap the primary endpoint
    pub fn new(endpoint: Endpoint, timeout: Duration, metrics: Arc<BridgeMetrics>) -> Self {
        Self {
            endpoint,
            arbiter: BusArbiter::new(),
            timeout,
            metrics,
        }
    }

    /// The primary endpoint
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The bus arbiter
    pub fn arbiter(&self) -> &BusArbiter {
        &self.arbiter
    }

    /// Exchange timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Make sure the primary gateway is connected, outside the arbiter
    ///
    /// Concurrent callers may both dial; the later connection replaces the
    /// earlier one.
    ///
    /// # Errors
    ///
    /// Returns the connect failure; nothing is retried here.
    pub async fn ensure_connected(&self) -> BridgeResult<()> {
        if self.endpoint.is_connected() {
            return Ok(());
        }
        self.metrics.inc_reconnect_attempts();
        self.endpoint.ensure_connected().await
    }

    /// Write `request`, await one reply chunk and pass it to `relay`
    ///
    /// The whole sequence runs under the bus arbiter. A failed relay leaves the
    /// primary connection untouched.
    pub async fn exchange_and_relay<F, Fut>(&self, request: Bytes, relay: F) -> ExchangeOutcome
    where
        F: FnOnce(Bytes) -> Fut,
        Fut: Future<Output = BridgeResult<()>>,
    {
        self.arbiter
            .with_exclusive_access(|| async move {
                if let Err(e) = self.endpoint.write_and_flush(&request, self.timeout).await {
                    return self.primary_failed(e);
                }
                self.metrics.add_bytes_to_bus(request.len() as u64);
                debug!(bytes = request.len(), data = %to_hex(&request), "Forwarded to bus");

                let mut exchange = Exchange::sent(request, self.timeout);
                match self.endpoint.read(MAX_CHUNK_SIZE, exchange.time_left()).await {
                    Ok(ReadOutcome::Data(reply)) => {
                        self.metrics.add_bytes_from_bus(reply.len() as u64);
                        debug!(bytes = reply.len(), data = %to_hex(&reply), "Reply from bus");
                        exchange.response = Some(reply.clone());

                        match relay(reply).await {
                            Ok(()) => {
                                self.metrics.inc_exchanges_relayed();
                                ExchangeOutcome::Relayed(exchange)
                            }
                            Err(e) => {
                                warn!(error = %e, "Could not relay bus reply");
                                self.metrics.inc_exchanges_failed();
                                ExchangeOutcome::RelayFailed(e)
                            }
                        }
                    }
                    Ok(ReadOutcome::TimedOut) => {
                        warn!(
                            timeout_ms = self.timeout.as_millis() as u64,
                            "Timeout waiting for response from primary gateway"
                        );
                        self.metrics.inc_exchanges_unanswered();
                        ExchangeOutcome::NoReply(exchange)
                    }
                    Ok(ReadOutcome::Closed) => {
                        self.primary_failed(BridgeError::closed(self.endpoint.role()))
                    }
                    Err(e) => self.primary_failed(e),
                }
            })
            .await
    }

    fn primary_failed(&self, e: BridgeError) -> ExchangeOutcome {
        if e.is_retryable() {
            warn!(error = %e, "Error communicating with primary gateway");
        } else {
            error!(error = %e, "Error communicating with primary gateway");
        }
        self.metrics.inc_exchanges_failed();
        ExchangeOutcome::PrimaryFailed(e)
    }
}
