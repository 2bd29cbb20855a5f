//! # edgex-bridge
//!
//! Bridges EdgeX device telemetry from a message bus to in-process consumers.
//!
//! This crate is the facade over the workspace:
//!
//! - [`edgex_bus`]: the pluggable bus capability and the in-memory `LocalBus`
//! - [`edgex_registry`]: reference-counted device subscriptions over one
//!   shared client
//! - [`edgex_secrets`]: session and identity tokens, bus credentials
//!
//! ```rust,ignore
//! use edgex_bridge::{BridgeConfig, EdgexBridge};
//! use edgex_bus::{Connectors, LocalBus, Protocol};
//! use std::sync::Arc;
//!
//! edgex_bridge::logging::init_logging_from_env()?;
//!
//! let connectors = Connectors::new().with(Arc::new(LocalBus::new(Protocol::Mqtt)));
//! let bridge = EdgexBridge::new(BridgeConfig::from_env()?, connectors)?;
//! ```

mod bridge;
mod config;
mod error;
pub mod logging;

pub use bridge::{EdgexBridge, ToggleOutcome};
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use logging::{init_logging, init_logging_from_env, LoggingError, LoggingMode};

pub use edgex_bus;
pub use edgex_registry;
pub use edgex_secrets;
