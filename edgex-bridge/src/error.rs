use edgex_bus::BusError;
use edgex_registry::RegistryError;
use edgex_secrets::CredentialError;
use thiserror::Error;

use crate::logging::LoggingError;

/// Errors surfaced by the bridge facade.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Message bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Subscription error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Secret store error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
