//! Core types for the edgex-bus crate.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::BusError;

/// Name of an EdgeX device, the routing key for subscriptions.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceName(pub String);

impl DeviceName {
    /// Create a new device name from a string.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the device name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for DeviceName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&str> for DeviceName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl fmt::Display for DeviceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wire protocols the bridge can be configured with.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum Protocol {
    /// MQTT 3.1.1 / 5 broker
    Mqtt,
    /// NATS core
    Nats,
}

impl Protocol {
    /// Lowercase identifier used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Mqtt => "mqtt",
            Protocol::Nats => "nats",
        }
    }
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Mqtt
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mqtt" => Ok(Protocol::Mqtt),
            "nats" => Ok(Protocol::Nats),
            other => Err(BusError::UnknownProtocol(other.to_string())),
        }
    }
}

/// Username/password pair used to open a bus connection.
///
/// The credential endpoint returns more fields (host, port, ...); those are
/// ignored. Empty strings mean "connect anonymously".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusCredentials {
    /// Broker username
    #[serde(default)]
    pub username: String,
    /// Broker password
    #[serde(default)]
    pub password: String,
}

impl BusCredentials {
    /// Create credentials from a username and password.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Credentials with both fields empty.
    pub fn empty() -> Self {
        Self::default()
    }

    /// True when neither a username nor a password is set.
    pub fn is_empty(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }
}

/// A raw inbound message as received from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Concrete topic the message was published on
    pub topic: String,
    /// Undecoded payload
    pub payload: Bytes,
}

impl BusMessage {
    /// Create a new message.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}
