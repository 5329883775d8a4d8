//! Configuration types for nport-bridge

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{BridgeError, BridgeResult};

/// Default address of the gateway in front of the device bus
pub const DEFAULT_PRIMARY_HOST: &str = "192.168.1.100";

/// Default TCP port of the primary gateway
pub const DEFAULT_PRIMARY_PORT: u16 = 4001;

/// Default address of the gateway in front of the second bus participant
pub const DEFAULT_SECONDARY_HOST: &str = "192.168.1.101";

/// Default TCP port of the secondary gateway
pub const DEFAULT_SECONDARY_PORT: u16 = 4002;

/// Default bind host for inbound clients
pub const DEFAULT_LISTEN_HOST: &str = "0.0.0.0";

/// Default bind port for inbound clients
pub const DEFAULT_LISTEN_PORT: u16 = 5020;

/// Default connect/exchange timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 3;

/// Largest accepted timeout in seconds
pub const MAX_TIMEOUT_SECS: u64 = 3600;

/// A `host:port` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointAddress {
    /// Host name or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl EndpointAddress {
    /// Create a new address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Gateway in front of the device bus
    pub primary: EndpointAddress,

    /// Gateway in front of the second bus participant
    pub secondary: EndpointAddress,

    /// Bind address for inbound clients
    pub listen: EndpointAddress,

    /// Timeout in seconds for connects and primary exchanges
    pub timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            primary: EndpointAddress::new(DEFAULT_PRIMARY_HOST, DEFAULT_PRIMARY_PORT),
            secondary: EndpointAddress::new(DEFAULT_SECONDARY_HOST, DEFAULT_SECONDARY_PORT),
            listen: EndpointAddress::new(DEFAULT_LISTEN_HOST, DEFAULT_LISTEN_PORT),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl BridgeConfig {
    /// Timeout as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Check the values that the type system cannot
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Configuration` naming the offending setting.
    pub fn validate(&self) -> BridgeResult<()> {
        if !(1..=MAX_TIMEOUT_SECS).contains(&self.timeout_secs) {
            return Err(BridgeError::configuration_with_key(
                format!("timeout must be between 1 and {MAX_TIMEOUT_SECS} seconds"),
                "MODBUS_TIMEOUT",
            ));
        }

        for (address, key) in [
            (&self.primary, "NPORT1_HOST"),
            (&self.secondary, "NPORT2_HOST"),
            (&self.listen, "LISTEN_HOST"),
        ] {
            if address.host.trim().is_empty() {
                return Err(BridgeError::configuration_with_key("host is empty", key));
            }
        }

        if self.primary.port == 0 || self.secondary.port == 0 {
            return Err(BridgeError::configuration(
                "gateway ports must be non-zero",
            ));
        }

        Ok(())
    }
}
