//! Bridge facade
//!
//! Owns one subscription registry and one token lifecycle manager and wires
//! them together the way a host node runtime needs: credentials are fetched
//! right before subscribing, and a repeated subscribe request from the same
//! consumer turns it off again.

use std::sync::Arc;

use edgex_bus::{BusCredentials, Connectors, Protocol};
use edgex_registry::{
    RegistryError, SubscribeOutcome, Subscriber, SubscriptionRegistry, SubscriptionRequest,
    SubscriptionStatus, UnsubscribeOutcome,
};
use edgex_secrets::TokenLifecycleManager;

use crate::config::BridgeConfig;
use crate::error::Result;

/// What a [`toggle_subscription`](EdgexBridge::toggle_subscription) call did.
#[derive(Debug, Clone, PartialEq)]
pub enum ToggleOutcome {
    Subscribed(SubscribeOutcome),
    Unsubscribed(UnsubscribeOutcome),
}

/// Entry point for host runtimes.
///
/// # Example
///
/// ```rust,ignore
/// let connectors = Connectors::new().with(Arc::new(my_mqtt_connector));
/// let bridge = EdgexBridge::new(BridgeConfig::from_env()?, connectors)?;
///
/// let request = SubscriptionRequest::parse("pump-1", &["voltage:0"], 1)?;
/// bridge.toggle_subscription(node.clone(), request, None).await?;
/// ```
pub struct EdgexBridge {
    config: BridgeConfig,
    connectors: Connectors,
    registry: SubscriptionRegistry,
    secrets: TokenLifecycleManager,
}

impl EdgexBridge {
    /// Build the bridge and start bootstrapping the secret store.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: BridgeConfig, connectors: Connectors) -> Result<Self> {
        let secrets = TokenLifecycleManager::start(config.secret_store.clone())?;

        tracing::info!(
            "EdgeX bridge ready: default protocol {}, connectors {:?}, secret store {}",
            config.default_protocol,
            connectors.protocols(),
            if config.secret_store.enabled { "enabled" } else { "disabled" }
        );

        Ok(Self {
            config,
            connectors,
            registry: SubscriptionRegistry::new(),
            secrets,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn secrets(&self) -> &TokenLifecycleManager {
        &self.secrets
    }

    /// Subscribe `subscriber` to the requested device, or unsubscribe it if it
    /// is already subscribed.
    ///
    /// `protocol` overrides the configured default. Errors are also reported
    /// to the subscriber through its status and error callbacks.
    pub async fn toggle_subscription(
        &self,
        subscriber: Arc<dyn Subscriber>,
        request: SubscriptionRequest,
        protocol: Option<Protocol>,
    ) -> Result<ToggleOutcome> {
        if self.registry.is_subscribed(&subscriber, &request.device).await {
            let outcome = self.registry.unsubscribe(&subscriber, &request.device).await;
            return Ok(ToggleOutcome::Unsubscribed(outcome));
        }

        let protocol = protocol.unwrap_or(self.config.default_protocol);
        let connector = match self.connectors.get(protocol) {
            Ok(connector) => connector,
            Err(e) => {
                let error = RegistryError::Connect(e.clone());
                subscriber.report_status(SubscriptionStatus::SubscribeError);
                subscriber.report_error(&error);
                return Err(e.into());
            }
        };

        let credentials = self.secrets.get_message_bus_credentials().await;
        let outcome = self
            .registry
            .subscribe_on(protocol, connector.as_ref(), &credentials, subscriber, request)
            .await?;

        Ok(ToggleOutcome::Subscribed(outcome))
    }

    /// Current identity token; empty when unavailable.
    pub async fn identity_token(&self) -> String {
        self.secrets.get_identity_token().await
    }

    /// Message-bus credentials; empty when unavailable.
    pub async fn bus_credentials(&self) -> BusCredentials {
        self.secrets.get_message_bus_credentials().await
    }

    /// Stop token renewals and release every subscription and the bus client.
    pub async fn shutdown(&self) {
        self.secrets.shutdown().await;
        self.registry.close().await;
        tracing::info!("EdgeX bridge stopped");
    }
}

impl std::fmt::Debug for EdgexBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgexBridge")
            .field("config", &self.config)
            .field("connectors", &self.connectors)
            .field("secrets", &self.secrets)
            .finish_non_exhaustive()
    }
}
