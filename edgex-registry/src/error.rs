use edgex_bus::{BusError, DeviceName};
use thiserror::Error;

/// Errors reported by the subscription registry.
///
/// Most of these never leave the registry as a `Result`; they are handed to the
/// affected subscribers through [`Subscriber::report_error`](crate::Subscriber::report_error).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// An inbound message could not be decoded
    #[error("Message parse error: {0}")]
    Parse(String),

    /// The transport rejected a topic subscribe or unsubscribe
    #[error("{protocol} subscription error for device {device}: {source}")]
    Subscription {
        device: DeviceName,
        protocol: String,
        #[source]
        source: BusError,
    },

    /// Opening the shared client failed
    #[error("Failed to open message bus client: {0}")]
    Connect(#[source] BusError),

    /// Closing the shared client failed
    #[error("{protocol} connection cannot be closed: {source}")]
    Teardown {
        protocol: String,
        #[source]
        source: BusError,
    },

    /// A selector string is not of the form `label:position`
    #[error("Invalid selector {0:?}, expected \"<sourceLabel>:<basePosition>\"")]
    InvalidSelector(String),

    /// Subscribe was called before a client was acquired
    #[error("No message bus client is connected")]
    NoClient,
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RegistryError::Parse("expected value at line 1 column 1".to_string());
        assert_eq!(
            err.to_string(),
            "Message parse error: expected value at line 1 column 1"
        );

        let err = RegistryError::Subscription {
            device: DeviceName::from("pump-1"),
            protocol: "MQTT".to_string(),
            source: BusError::Closed,
        };
        assert_eq!(
            err.to_string(),
            "MQTT subscription error for device pump-1: Message bus connection is closed"
        );

        let err = RegistryError::InvalidSelector("Voltage".to_string());
        assert!(err.to_string().contains("\"Voltage\""));
    }
}
