//! Bridge configuration.

use edgex_bus::Protocol;
use edgex_secrets::SecretStoreConfig;

use crate::error::{BridgeError, Result};

/// Everything the bridge needs at construction time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Protocol used when a subscription request names none
    pub default_protocol: Protocol,
    /// Secret-store integration
    pub secret_store: SecretStoreConfig,
}

impl BridgeConfig {
    /// Read the configuration from the process environment.
    ///
    /// `MESSAGEBUS_TYPE` selects the default protocol (`mqtt` when unset);
    /// see [`SecretStoreConfig::from_env`] for the secret-store variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default_protocol = match lookup("MESSAGEBUS_TYPE").filter(|v| !v.trim().is_empty()) {
            Some(value) => value.parse::<Protocol>().map_err(|e| {
                BridgeError::Config(format!("MESSAGEBUS_TYPE: {}", e))
            })?,
            None => Protocol::default(),
        };

        Ok(Self {
            default_protocol,
            secret_store: SecretStoreConfig::from_lookup(lookup),
        })
    }

    pub fn with_default_protocol(mut self, protocol: Protocol) -> Self {
        self.default_protocol = protocol;
        self
    }

    pub fn with_secret_store(mut self, secret_store: SecretStoreConfig) -> Self {
        self.secret_store = secret_store;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_mqtt() {
        let config = BridgeConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.default_protocol, Protocol::Mqtt);
        assert!(!config.secret_store.enabled);
    }

    #[test]
    fn test_message_bus_type() {
        let config = BridgeConfig::from_lookup(|key| {
            (key == "MESSAGEBUS_TYPE").then(|| "NATS".to_string())
        })
        .unwrap();
        assert_eq!(config.default_protocol, Protocol::Nats);
    }

    #[test]
    fn test_unknown_message_bus_type() {
        let err = BridgeConfig::from_lookup(|key| {
            (key == "MESSAGEBUS_TYPE").then(|| "redis".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, BridgeError::Config(ref msg) if msg.contains("redis")));
    }

    #[test]
    fn test_secret_store_section() {
        let config = BridgeConfig::from_lookup(|key| match key {
            "EDGEX_SECURITY_SECRET_STORE" => Some("true".to_string()),
            "SERVICE_HOST" => Some("bridge-1".to_string()),
            _ => None,
        })
        .unwrap();
        assert!(config.secret_store.enabled);
        assert_eq!(config.secret_store.service_key, "bridge-1");
    }
}
