//! Mutual exclusion for the device bus
//!
//! The RS-485 bus behind the primary gateway tolerates a single transaction in
//! flight. Every path that writes to the primary endpoint goes through one
//! shared [`BusArbiter`].

use std::future::Future;

use tokio::sync::{Mutex, MutexGuard};

/// Single-holder gate shared by everything that talks to the device bus
///
/// Waiters are served in the order tokio's mutex queues them (FIFO).
#[derive(Debug, Default)]
pub struct BusArbiter {
    token: Mutex<()>,
}

/// Proof of exclusive bus access; the bus is released when this drops
#[derive(Debug)]
#[must_use = "the bus is released as soon as the permit is dropped"]
pub struct BusPermit<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl BusArbiter {
    /// Create a free arbiter
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the bus; no timeout applies to the wait itself
    pub async fn acquire(&self) -> BusPermit<'_> {
        BusPermit {
            _guard: self.token.lock().await,
        }
    }

    /// Whether someone currently holds the bus
    pub fn is_busy(&self) -> bool {
        self.token.try_lock().is_err()
    }

    /// Run `f` while holding the bus
    ///
    /// The permit is released on every exit path of the body, including early
    /// returns, errors and cancellation of the returned future.
    pub async fn with_exclusive_access<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = self.acquire().await;
        f().await
    }
}
