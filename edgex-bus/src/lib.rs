//! # edgex-bus
//!
//! The message-bus capability used by the EdgeX bridge.
//!
//! A bus implementation is split in two halves: a [`BusConnector`] that knows how
//! to open a connection for one wire protocol, and the [`BusClient`] handle it
//! returns. Inbound `(topic, payload)` messages are pushed onto the channel the
//! connector receives at connect time, which keeps the registry side free of any
//! protocol-specific callback plumbing.
//!
//! Connectors are registered once at startup in a [`Connectors`] map keyed by
//! [`Protocol`]. This crate also ships [`LocalBus`], an in-memory broker that
//! honours MQTT wildcard filters, for embedding and tests.

mod client;
mod error;
mod local;
pub mod topic;
mod types;

pub use client::*;
pub use error::*;
pub use local::*;
pub use types::*;
