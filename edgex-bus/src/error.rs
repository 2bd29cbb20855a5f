//! Error types for the edgex-bus crate.

use crate::types::Protocol;

/// Errors raised by bus connectors and clients.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// No connector is registered for the requested protocol
    #[error("No message bus implementation for protocol: {0}")]
    UnsupportedProtocol(Protocol),

    /// The protocol identifier is not one the bridge knows about
    #[error("Unknown message bus protocol: {0}")]
    UnknownProtocol(String),

    /// Opening the connection failed
    #[error("Failed to connect to message bus: {0}")]
    Connect(String),

    /// A topic subscribe request was rejected
    #[error("Failed to subscribe to topic {topic}: {reason}")]
    Subscribe {
        /// The topic filter
        topic: String,
        /// Transport-provided reason
        reason: String,
    },

    /// A topic unsubscribe request was rejected
    #[error("Failed to unsubscribe from topic {topic}: {reason}")]
    Unsubscribe {
        /// The topic filter
        topic: String,
        /// Transport-provided reason
        reason: String,
    },

    /// Closing the connection failed
    #[error("Failed to close message bus connection: {0}")]
    End(String),

    /// The client was used after it was ended
    #[error("Message bus connection is closed")]
    Closed,
}

/// Convenience type alias for Results using BusError.
pub type Result<T> = std::result::Result<T, BusError>;
