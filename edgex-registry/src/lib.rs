//! # edgex-registry
//!
//! Reference-counted device subscriptions over one shared message-bus client.
//!
//! Consumers implement [`Subscriber`] and bind to a device with a
//! [`SubscriptionRequest`]. The [`SubscriptionRegistry`] keeps at most one
//! live client, subscribes a device topic only for the first consumer of that
//! device, routes each inbound event to every consumer of its device through
//! the consumer's selectors, and tears the client down once the last device
//! is released.
//!
//! ```rust,ignore
//! use edgex_bus::{BusCredentials, LocalBus, Protocol};
//! use edgex_registry::{SubscriptionRegistry, SubscriptionRequest};
//!
//! let registry = SubscriptionRegistry::new();
//! let bus = LocalBus::new(Protocol::Mqtt);
//! let request = SubscriptionRequest::parse("pump-1", &["voltage:0", "current:1"], 2)?;
//!
//! registry
//!     .subscribe_on(Protocol::Mqtt, &bus, &BusCredentials::empty(), consumer, request)
//!     .await?;
//! ```

mod error;
mod event;
mod registry;
mod selector;
mod subscriber;

pub use error::{RegistryError, Result};
pub use event::{convert_value_by_type, Envelope, EnvelopePayload, InboundEvent, OutputMessage, Reading};
pub use registry::{
    SubscribeOutcome, SubscriberBinding, SubscriptionRegistry, TeardownPhase, UnsubscribeOutcome,
};
pub use selector::{Selector, SubscriptionRequest};
pub use subscriber::{Subscriber, SubscriptionStatus, TeardownHook};
