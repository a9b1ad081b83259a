//! Error hierarchy for the Relay bridge.
//!
//! Built on [`thiserror`]:
//!
//! - [`BridgeError`]: top-level enum covering all bridge error domains
//! - [`TransportError`]: socket-level failures, always recoverable via the
//!   session's backoff/retry path
//!
//! Correlation timeouts and unknown namespaces are deliberately *not* fatal:
//! the session logs them and keeps the connection alive. Only the caller of
//! the single affected operation observes them.

use thiserror::Error;

/// Socket-level failure on the underlying message transport.
///
/// Every variant is recoverable: the session tears the connection down and
/// retries after the configured backoff.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Opening the connection failed (DNS, TCP, TLS, proxy, or handshake).
    #[error("failed to connect: {0}")]
    Connect(String),

    /// The connection closed while sending or receiving.
    #[error("connection closed")]
    Closed,

    /// Send or receive failed for any other reason.
    #[error("transport I/O error: {0}")]
    Io(String),

    /// The configured URL could not be turned into a socket endpoint.
    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(String),

    /// TLS options could not be applied to the connector.
    #[error("TLS configuration error: {0}")]
    Tls(String),
}

/// Top-level error type for bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A public operation was invoked while the session is not streaming.
    #[error("not connected to remote instance: {operation}")]
    NotConnected {
        /// The operation that was rejected.
        operation: String,
    },

    /// The remote side rejected the `hello` authentication request.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// An inbound message could not be interpreted.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No response arrived for a correlated request within the timeout.
    #[error("no response for {request_type} within timeout")]
    Timeout {
        /// The request type that timed out.
        request_type: String,
    },

    /// A namespace was neither mapped nor client-prefixed.
    #[error("unidentified namespace: {0}")]
    UnknownNamespace(String),

    /// Underlying transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl BridgeError {
    /// Build a [`BridgeError::NotConnected`] for the named operation.
    #[must_use]
    pub fn not_connected(operation: impl Into<String>) -> Self {
        Self::NotConnected {
            operation: operation.into(),
        }
    }
}

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_connected_display_names_operation() {
        let err = BridgeError::not_connected("call_service");
        assert_eq!(
            err.to_string(),
            "not connected to remote instance: call_service"
        );
    }

    #[test]
    fn timeout_display_names_request_type() {
        let err = BridgeError::Timeout {
            request_type: "get_state".into(),
        };
        assert!(err.to_string().contains("get_state"));
    }

    #[test]
    fn transport_error_converts() {
        let err: BridgeError = TransportError::Closed.into();
        assert!(matches!(err, BridgeError::Transport(TransportError::Closed)));
        assert_eq!(err.to_string(), "connection closed");
    }

    #[test]
    fn unknown_namespace_display() {
        let err = BridgeError::UnknownNamespace("kitchen".into());
        assert_eq!(err.to_string(), "unidentified namespace: kitchen");
    }
}
