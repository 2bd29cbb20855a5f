//! Test helpers for registry integration tests.
//!
//! Provides a channel-backed subscriber so tests can await deliveries coming
//! through the registry's forwarding task, plus event payload builders.

#![allow(dead_code)]

use edgex_registry::{OutputMessage, RegistryError, Subscriber, SubscriptionStatus, TeardownHook};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Subscriber that records everything and forwards deliveries to a channel.
pub struct ChannelSubscriber {
    deliveries: mpsc::UnboundedSender<Vec<Option<OutputMessage>>>,
    pub statuses: Mutex<Vec<SubscriptionStatus>>,
    pub errors: Mutex<Vec<RegistryError>>,
    pub hooks: Mutex<Vec<TeardownHook>>,
}

impl ChannelSubscriber {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Vec<Option<OutputMessage>>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriber = Arc::new(Self {
            deliveries: tx,
            statuses: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            hooks: Mutex::new(Vec::new()),
        });
        (subscriber, rx)
    }

    /// Statuses seen so far, without the `LastReceived` timestamps.
    pub fn lifecycle_statuses(&self) -> Vec<SubscriptionStatus> {
        self.statuses
            .lock()
            .iter()
            .filter(|status| !matches!(status, SubscriptionStatus::LastReceived(_)))
            .cloned()
            .collect()
    }

    pub fn take_hook(&self) -> TeardownHook {
        self.hooks.lock().pop().expect("no teardown hook was registered")
    }
}

impl Subscriber for ChannelSubscriber {
    fn deliver(&self, outputs: Vec<Option<OutputMessage>>) {
        let _ = self.deliveries.send(outputs);
    }

    fn report_status(&self, status: SubscriptionStatus) {
        self.statuses.lock().push(status);
    }

    fn report_error(&self, error: &RegistryError) {
        self.errors.lock().push(error.clone());
    }

    fn on_teardown(&self, hook: TeardownHook) {
        self.hooks.lock().push(hook);
    }
}

/// Upcast helper for registry calls.
pub fn as_dyn(subscriber: &Arc<ChannelSubscriber>) -> Arc<dyn Subscriber> {
    subscriber.clone()
}

/// Topic a device service would publish `source` readings of `device` on.
pub fn device_event_topic(device: &str, source: &str) -> String {
    format!("edgex/events/device/device-virtual/virtual-profile/{}/{}", device, source)
}

/// Serialized event envelope.
pub fn event_payload(id: &str, source: &str, readings: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "apiVersion": "v3",
        "receivedTopic": "edgex/events/device",
        "payload": {
            "apiVersion": "v3",
            "event": {
                "id": id,
                "deviceName": "unused",
                "sourceName": source,
                "readings": readings
            }
        }
    }))
    .unwrap()
}

/// Wait for the next delivery, failing the test after a second.
pub async fn next_delivery(
    rx: &mut mpsc::UnboundedReceiver<Vec<Option<OutputMessage>>>,
) -> Vec<Option<OutputMessage>> {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for a delivery")
        .expect("delivery channel closed")
}
