//! nport-bridge: serialized TCP access to a shared RS-485 bus
//!
//! A field device sits on an RS-485 bus that tolerates one transaction at a
//! time and is reachable only through a TCP serial device server (the
//! *primary* gateway). Two kinds of consumers want the bus:
//!
//! - any number of transient TCP clients connecting to the bridge
//! - a second bus participant behind its own serial device server (the
//!   *secondary* gateway), which the bridge keeps connected permanently
//!
//! The bridge forwards raw byte chunks (at most 1024 bytes each) and holds a
//! single bus token for the whole write, read and reply cycle, so exchanges
//! from different consumers never interleave on the wire. Payloads are
//! opaque; nothing here parses frames.
//!
//! # Quick Start
//!
//! ```bash
//! NPORT1_HOST=192.168.1.100 NPORT2_HOST=192.168.1.101 nport-bridge
//!
//! # Same thing with flags, debug logging
//! nport-bridge --nport1-host 192.168.1.100 --listen-port 5020 -v
//! ```
//!
//! # Architecture
//!
//! ```text
//!  TCP clients ────────► ClientSession ───┐
//!                                         ├──► BusArbiter ──► primary Endpoint ──► device bus
//!  secondary Endpoint ─► SecondaryBridge ─┘
//! ```
//!
//! Any I/O failure on a gateway drops its connection handle; whichever loop
//! next needs that gateway reconnects it.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bridge;
pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

#[cfg(feature = "cli")]
pub mod cli;

pub use error::{BridgeError, BridgeResult};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::bridge::{
        BridgeMetrics, BusArbiter, Endpoint, EndpointRole, MetricsSnapshot, PrimaryBus,
        ReadOutcome, RetryPolicy,
    };
    pub use crate::config::{BridgeConfig, EndpointAddress};
    pub use crate::error::{BridgeError, BridgeResult};
    pub use crate::runtime::{Bridge, RunningBridge};
}

/// Version of nport-bridge
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
