//! Error types for nport-bridge
//!
//! Only two kinds of failure ever leave the bridge: invalid configuration and
//! an unreachable primary gateway at startup. Everything else is absorbed by
//! the loop that hit it and turned into a reconnect on the next attempt.

use thiserror::Error;

use crate::bridge::EndpointRole;

/// Result type for bridge operations
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// Main error type for nport-bridge
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BridgeError {
    /// Configuration error
    ///
    /// Invalid setting value (timeout out of range, empty host).
    #[error("Configuration error: {message}")]
    Configuration {
        /// What is wrong
        message: String,
        /// Environment variable of the offending setting
        key: Option<String>,
    },

    /// Connection to a gateway could not be established
    #[error("Connection to {endpoint} gateway failed: {message}")]
    Connect {
        /// Gateway that was dialed
        endpoint: EndpointRole,
        /// Dial failure
        message: String,
    },

    /// Operation attempted on an endpoint without a live connection
    #[error("{endpoint} gateway is not connected")]
    NotConnected {
        /// Gateway without a handle
        endpoint: EndpointRole,
    },

    /// Gateway closed the connection mid-exchange
    #[error("Connection closed by {endpoint} gateway")]
    Closed {
        /// Gateway that hung up
        endpoint: EndpointRole,
    },

    /// I/O failure on an established endpoint connection
    #[error("{endpoint} gateway I/O error during {operation}: {source}")]
    EndpointIo {
        /// Gateway the operation ran against
        endpoint: EndpointRole,
        /// `read` or `write`
        operation: &'static str,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Timeout error
    ///
    /// Operation exceeded configured timeout.
    #[error("Timeout: {operation} exceeded {timeout_ms}ms")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Configured timeout
        timeout_ms: u64,
    },

    /// Listener could not be bound
    #[error("Failed to bind listener on {address}: {source}")]
    Bind {
        /// Requested listen address
        address: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            key: None,
        }
    }

    /// Create a configuration error with key context
    pub fn configuration_with_key(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Create a connection error for the given endpoint
    pub fn connect(endpoint: EndpointRole, message: impl Into<String>) -> Self {
        Self::Connect {
            endpoint,
            message: message.into(),
        }
    }

    /// Create a not-connected error for the given endpoint
    pub fn not_connected(endpoint: EndpointRole) -> Self {
        Self::NotConnected { endpoint }
    }

    /// Create a peer-closed error for the given endpoint
    pub fn closed(endpoint: EndpointRole) -> Self {
        Self::Closed { endpoint }
    }

    /// Create an endpoint I/O error
    pub fn endpoint_io(
        endpoint: EndpointRole,
        operation: &'static str,
        source: std::io::Error,
    ) -> Self {
        Self::EndpointIo {
            endpoint,
            operation,
            source,
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Check if a later attempt of the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. }
                | Self::NotConnected { .. }
                | Self::Closed { .. }
                | Self::EndpointIo { .. }
                | Self::Timeout { .. }
                | Self::Io(_)
        )
    }
}

/// Extension trait for I/O results to attach endpoint context
pub trait BridgeErrorExt<T> {
    /// Tag an I/O failure with the endpoint and operation it happened on
    fn endpoint_context(self, endpoint: EndpointRole, operation: &'static str) -> BridgeResult<T>;
}

impl<T> BridgeErrorExt<T> for std::io::Result<T> {
    fn endpoint_context(self, endpoint: EndpointRole, operation: &'static str) -> BridgeResult<T> {
        self.map_err(|e| BridgeError::endpoint_io(endpoint, operation, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = BridgeError::configuration("test");
        assert!(matches!(err, BridgeError::Configuration { .. }));

        let err = BridgeError::not_connected(EndpointRole::Primary);
        assert!(matches!(
            err,
            BridgeError::NotConnected {
                endpoint: EndpointRole::Primary
            }
        ));
    }

    #[test]
    fn test_error_display() {
        let err = BridgeError::connect(EndpointRole::Secondary, "connection refused");
        let text = err.to_string();
        assert!(text.contains("secondary"));
        assert!(text.contains("connection refused"));

        let err = BridgeError::timeout("primary read", 3000);
        assert_eq!(err.to_string(), "Timeout: primary read exceeded 3000ms");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(BridgeError::timeout("primary write", 3000).is_retryable());
        assert!(BridgeError::not_connected(EndpointRole::Primary).is_retryable());
        assert!(!BridgeError::configuration("bad timeout").is_retryable());
    }

    #[test]
    fn test_endpoint_context() {
        let result: std::io::Result<()> = Err(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "pipe closed",
        ));

        match result.endpoint_context(EndpointRole::Primary, "write") {
            Err(BridgeError::EndpointIo {
                endpoint,
                operation,
                source,
            }) => {
                assert_eq!(endpoint, EndpointRole::Primary);
                assert_eq!(operation, "write");
                assert_eq!(source.kind(), std::io::ErrorKind::BrokenPipe);
            }
            other => panic!("Wrong error type: {other:?}"),
        }
    }
}
