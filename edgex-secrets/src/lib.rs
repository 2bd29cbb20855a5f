//! # edgex-secrets
//!
//! Secret-store integration for the EdgeX bridge.
//!
//! The [`TokenLifecycleManager`] reads the session token the secret-store
//! setup service leaves on disk, validates it (regenerating it through the
//! setup service when the store rejects it), derives an identity token, and
//! keeps both renewed in the background. It also serves the message-bus
//! credentials stored for the service.
//!
//! Every public getter degrades to an empty value instead of failing:
//!
//! ```rust,ignore
//! use edgex_secrets::{SecretStoreConfig, TokenLifecycleManager};
//!
//! let manager = TokenLifecycleManager::start(SecretStoreConfig::from_env())?;
//! let jwt = manager.get_identity_token().await;          // "" when unavailable
//! let creds = manager.get_message_bus_credentials().await; // empty when unavailable
//! ```

mod client;
mod config;
mod error;
pub mod jwt;
mod manager;
mod renewal;
mod token;

pub use client::{SecretStoreClient, TOKEN_HEADER};
pub use config::{
    token_file_for, SecretStoreConfig, DEFAULT_SERVICE_KEY, SECRET_STORE_PORT,
    SECRET_STORE_SETUP_PORT,
};
pub use error::{CredentialError, Result};
pub use manager::{LifecyclePhase, TokenLifecycleManager};
pub use token::{SessionTokenRecord, DEFAULT_SESSION_RENEWAL};
