//! The consumer side of the registry.
//!
//! A consumer implements [`Subscriber`]; the registry keeps an
//! `Arc<dyn Subscriber>` per binding and compares consumers by pointer
//! identity, so the same object subscribed twice is still one subscriber.

use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Local};
use edgex_bus::DeviceName;

use crate::error::RegistryError;
use crate::event::OutputMessage;
use crate::registry::{RegistryInner, SubscriptionRegistry, UnsubscribeOutcome};

/// Status notifications pushed to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionStatus {
    /// Bound to its device
    Subscribed,
    /// The topic subscribe was rejected
    SubscribeError,
    /// Waiting for the topic unsubscribe acknowledgement
    UnsubscribeInProgress,
    /// The topic unsubscribe was rejected
    UnsubscribeError,
    /// No longer bound
    Unsubscribed,
    /// Output was delivered at the given time
    LastReceived(DateTime<Local>),
}

impl SubscriptionStatus {
    /// Whether the status reports a failure.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::SubscribeError | Self::UnsubscribeError)
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subscribed => f.write_str("Subscribed"),
            Self::SubscribeError => f.write_str("Subscribe Error"),
            Self::UnsubscribeInProgress => f.write_str("Unsubscribe in progress..."),
            Self::UnsubscribeError => f.write_str("Unsubscribe Error"),
            Self::Unsubscribed => f.write_str("Unsubscribed"),
            Self::LastReceived(at) => write!(f, "Last received at: {}", at.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

/// Capability a consumer exposes to the registry.
///
/// Callbacks are synchronous and may run on the registry's forwarding task;
/// they should hand work off rather than block.
pub trait Subscriber: Send + Sync {
    /// Receive one output array, `arity` slots long; unmatched slots are `None`.
    fn deliver(&self, outputs: Vec<Option<OutputMessage>>);

    /// Receive a status change.
    fn report_status(&self, status: SubscriptionStatus);

    /// Receive an error that concerns this subscriber.
    fn report_error(&self, error: &RegistryError);

    /// Store the hook to run when the consumer is disposed of.
    ///
    /// Called once per successful subscribe.
    fn on_teardown(&self, hook: TeardownHook);
}

/// Unsubscribes one consumer from one device when run.
///
/// Holds only weak references, so keeping it inside the consumer does not
/// keep the consumer or the registry alive.
#[derive(Clone)]
pub struct TeardownHook {
    registry: Weak<RegistryInner>,
    subscriber: Weak<dyn Subscriber>,
    device: DeviceName,
}

impl TeardownHook {
    pub(crate) fn new(
        registry: &SubscriptionRegistry,
        subscriber: &Arc<dyn Subscriber>,
        device: DeviceName,
    ) -> Self {
        Self {
            registry: registry.downgrade(),
            subscriber: Arc::downgrade(subscriber),
            device,
        }
    }

    /// Device the hook releases.
    pub fn device(&self) -> &DeviceName {
        &self.device
    }

    /// Unsubscribe the consumer. Completes once the device-level unsubscribe
    /// has been acknowledged; never waits for a client teardown it triggers.
    pub async fn run(self) -> UnsubscribeOutcome {
        let (Some(inner), Some(subscriber)) = (self.registry.upgrade(), self.subscriber.upgrade())
        else {
            tracing::debug!("Teardown hook for {} outlived its registry or subscriber", self.device);
            return UnsubscribeOutcome::NotSubscribed;
        };

        SubscriptionRegistry::from_inner(inner)
            .unsubscribe(&subscriber, &self.device)
            .await
    }
}

impl fmt::Debug for TeardownHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeardownHook")
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

/// Pointer identity for subscribers.
pub(crate) fn same_subscriber(a: &Arc<dyn Subscriber>, b: &Arc<dyn Subscriber>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(SubscriptionStatus::Subscribed.to_string(), "Subscribed");
        assert_eq!(
            SubscriptionStatus::UnsubscribeInProgress.to_string(),
            "Unsubscribe in progress..."
        );
        assert!(SubscriptionStatus::LastReceived(Local::now())
            .to_string()
            .starts_with("Last received at: "));
    }

    #[test]
    fn test_status_is_error() {
        assert!(SubscriptionStatus::SubscribeError.is_error());
        assert!(SubscriptionStatus::UnsubscribeError.is_error());
        assert!(!SubscriptionStatus::Subscribed.is_error());
    }
}
