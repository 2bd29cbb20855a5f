//! Bus client capability and the protocol registration map.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{BusError, Result};
use crate::types::{BusCredentials, BusMessage, Protocol};

/// Sender half handed to a connector; every inbound message goes through it.
pub type InboundSender = mpsc::UnboundedSender<BusMessage>;

/// Receiver half kept by whoever owns the client.
pub type InboundReceiver = mpsc::UnboundedReceiver<BusMessage>;

/// A live connection to a message bus.
///
/// Every method resolves once the broker has acknowledged the request (or the
/// implementation's closest equivalent).
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; a single client is shared by every
/// device subscription in the registry.
#[async_trait]
pub trait BusClient: Send + Sync {
    /// Subscribe to a topic filter.
    async fn subscribe(&self, topic: &str) -> Result<()>;

    /// Remove a topic filter subscription.
    async fn unsubscribe(&self, topic: &str) -> Result<()>;

    /// Close the connection. `force` skips waiting for in-flight messages.
    ///
    /// After `end` the inbound sender must be dropped so the consumer side
    /// observes the end of the stream.
    async fn end(&self, force: bool) -> Result<()>;
}

/// Factory for clients of one wire protocol.
pub trait BusConnector: Send + Sync {
    /// The protocol this connector speaks.
    fn protocol(&self) -> Protocol;

    /// Open a connection authenticated with `credentials`, delivering inbound
    /// messages on `inbound`.
    fn connect(
        &self,
        inbound: InboundSender,
        credentials: &BusCredentials,
    ) -> Result<Arc<dyn BusClient>>;
}

/// Startup-time registration map from protocol to connector.
#[derive(Clone, Default)]
pub struct Connectors {
    connectors: HashMap<Protocol, Arc<dyn BusConnector>>,
}

impl Connectors {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector under the protocol it reports, replacing any
    /// previous registration.
    pub fn register(&mut self, connector: Arc<dyn BusConnector>) -> &mut Self {
        let protocol = connector.protocol();
        if self.connectors.insert(protocol, connector).is_some() {
            tracing::debug!("Replaced connector registered for {}", protocol);
        }
        self
    }

    /// Builder-style variant of [`Connectors::register`].
    pub fn with(mut self, connector: Arc<dyn BusConnector>) -> Self {
        self.register(connector);
        self
    }

    /// Look up the connector for a protocol.
    pub fn get(&self, protocol: Protocol) -> Result<Arc<dyn BusConnector>> {
        self.connectors
            .get(&protocol)
            .cloned()
            .ok_or(BusError::UnsupportedProtocol(protocol))
    }

    /// Protocols that have a connector.
    pub fn protocols(&self) -> Vec<Protocol> {
        self.connectors.keys().copied().collect()
    }
}

impl std::fmt::Debug for Connectors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connectors")
            .field("protocols", &self.protocols())
            .finish()
    }
}
