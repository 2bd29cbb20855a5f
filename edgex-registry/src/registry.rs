//! Device subscription registry
//!
//! One shared bus client serves every consumer. Topic subscriptions are
//! reference-counted per device: the first consumer of a device subscribes its
//! topic, the last one to leave unsubscribes it, and when no device is left the
//! client itself is ended.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use chrono::Local;
use edgex_bus::topic::{device_from_topic, device_topic};
use edgex_bus::{BusClient, BusConnector, BusCredentials, DeviceName, InboundReceiver, Protocol};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::error::{RegistryError, Result};
use crate::event::{Envelope, InboundEvent, OutputMessage};
use crate::selector::{Selector, SubscriptionRequest};
use crate::subscriber::{same_subscriber, Subscriber, SubscriptionStatus, TeardownHook};

/// Lifecycle of a full-client teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownPhase {
    /// No teardown pending
    Idle,
    /// A teardown task has been spawned but has not taken the client yet
    ClosingRequested,
    /// The client has been taken and `end` is in flight
    Closing,
    /// `end` returned; about to go back to `Idle`
    Closed,
}

/// Result of a subscribe call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// First subscriber of the device; the topic was subscribed
    TopicSubscribed,
    /// Joined an existing device subscription without a network call
    Joined,
    /// The subscriber was already bound to the device
    AlreadySubscribed,
}

/// Result of an unsubscribe call.
#[derive(Debug, Clone, PartialEq)]
pub enum UnsubscribeOutcome {
    /// The subscriber was not bound to the device
    NotSubscribed,
    /// Removed; other subscribers keep the device topic alive
    Released { remaining: usize },
    /// Removed the last subscriber and unsubscribed the device topic
    TopicReleased,
    /// Removed the last subscriber but the transport rejected the unsubscribe
    TopicReleaseFailed(RegistryError),
}

/// A consumer bound to a device.
#[derive(Clone)]
pub struct SubscriberBinding {
    subscriber: Arc<dyn Subscriber>,
    selectors: Vec<Selector>,
    arity: usize,
}

impl SubscriberBinding {
    fn new(subscriber: Arc<dyn Subscriber>, request: &SubscriptionRequest) -> Self {
        Self {
            subscriber,
            selectors: request.selectors.clone(),
            arity: request.arity,
        }
    }

    /// Declared selectors in order.
    pub fn selectors(&self) -> &[Selector] {
        &self.selectors
    }

    /// Declared output arity.
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Lay an event's readings out over this binding's output slots.
    ///
    /// The first selector whose label equals the event source wins; later
    /// selectors with the same label are never consulted.
    fn route(&self, event: &InboundEvent) -> Vec<Option<OutputMessage>> {
        let mut outputs = vec![None; self.arity];

        let Some(selector) = self
            .selectors
            .iter()
            .find(|selector| selector.label == event.source_name)
        else {
            return outputs;
        };

        for (offset, reading) in event.readings().iter().enumerate() {
            let slot = selector
                .base
                .checked_add(offset)
                .and_then(|position| outputs.get_mut(position));
            match slot {
                Some(slot) => *slot = Some(OutputMessage::new(reading.clone(), event)),
                None => tracing::debug!(
                    "Dropping reading {} of {}: slot {}+{} is beyond arity {}",
                    offset,
                    event.source_name,
                    selector.base,
                    offset,
                    self.arity
                ),
            }
        }

        outputs
    }
}

impl std::fmt::Debug for SubscriberBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberBinding")
            .field("selectors", &self.selectors)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

struct ActiveClient {
    protocol: Protocol,
    client: Arc<dyn BusClient>,
    forwarder: JoinHandle<()>,
}

struct RegistryState {
    client: Option<ActiveClient>,
    devices: HashMap<DeviceName, Vec<SubscriberBinding>>,
    teardown: TeardownPhase,
}

impl RegistryState {
    fn is_member(&self, subscriber: &Arc<dyn Subscriber>, device: &DeviceName) -> bool {
        self.devices.get(device).is_some_and(|bindings| {
            bindings
                .iter()
                .any(|binding| same_subscriber(&binding.subscriber, subscriber))
        })
    }

    fn all_subscribers(&self) -> Vec<Arc<dyn Subscriber>> {
        self.devices
            .values()
            .flatten()
            .map(|binding| Arc::clone(&binding.subscriber))
            .collect()
    }
}

/// Subscriber callbacks collected while the state lock is held and delivered,
/// in order, once it has been released.
#[derive(Default)]
struct Notices(Vec<(Arc<dyn Subscriber>, Notice)>);

enum Notice {
    Status(SubscriptionStatus),
    Error(RegistryError),
    Teardown(TeardownHook),
}

impl Notices {
    fn status(&mut self, subscriber: &Arc<dyn Subscriber>, status: SubscriptionStatus) {
        self.0.push((Arc::clone(subscriber), Notice::Status(status)));
    }

    fn failure(
        &mut self,
        subscriber: &Arc<dyn Subscriber>,
        status: SubscriptionStatus,
        error: &RegistryError,
    ) {
        self.status(subscriber, status);
        self.0
            .push((Arc::clone(subscriber), Notice::Error(error.clone())));
    }

    fn teardown(&mut self, subscriber: &Arc<dyn Subscriber>, hook: TeardownHook) {
        self.0.push((Arc::clone(subscriber), Notice::Teardown(hook)));
    }

    fn deliver(self) {
        for (subscriber, notice) in self.0 {
            match notice {
                Notice::Status(status) => subscriber.report_status(status),
                Notice::Error(error) => subscriber.report_error(&error),
                Notice::Teardown(hook) => subscriber.on_teardown(hook),
            }
        }
    }
}

pub(crate) struct RegistryInner {
    state: Mutex<RegistryState>,
    phase_tx: watch::Sender<TeardownPhase>,
}

/// Registry multiplexing one bus connection across device subscribers.
///
/// Cheap to clone; every clone refers to the same registry. Construct one per
/// process and hand it to whoever needs it.
///
/// # Example
///
/// ```rust,ignore
/// let registry = SubscriptionRegistry::new();
/// let bus = LocalBus::new(Protocol::Mqtt);
///
/// let request = SubscriptionRequest::parse("pump-1", &["voltage:0"], 1)?;
/// registry
///     .subscribe_on(Protocol::Mqtt, &bus, &BusCredentials::empty(), consumer, request)
///     .await?;
/// ```
#[derive(Clone)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry with no client.
    pub fn new() -> Self {
        let (phase_tx, _) = watch::channel(TeardownPhase::Idle);
        Self {
            inner: Arc::new(RegistryInner {
                state: Mutex::new(RegistryState {
                    client: None,
                    devices: HashMap::new(),
                    teardown: TeardownPhase::Idle,
                }),
                phase_tx,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<RegistryInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<RegistryInner> {
        Arc::downgrade(&self.inner)
    }

    /// Return the shared client, connecting a new one when there is none or
    /// when it speaks a different protocol.
    ///
    /// Switching protocol ends the old client first (errors are logged) and
    /// re-subscribes the topics of every device that still has subscribers.
    pub async fn acquire_client(
        &self,
        protocol: Protocol,
        connector: &dyn BusConnector,
        credentials: &BusCredentials,
    ) -> Result<Arc<dyn BusClient>> {
        let mut notices = Notices::default();
        let result = {
            let mut state = self.inner.state.lock().await;
            self.acquire_locked(&mut state, protocol, connector, credentials, &mut notices)
                .await
        };
        notices.deliver();
        result
    }

    async fn acquire_locked(
        &self,
        state: &mut RegistryState,
        protocol: Protocol,
        connector: &dyn BusConnector,
        credentials: &BusCredentials,
        notices: &mut Notices,
    ) -> Result<Arc<dyn BusClient>> {
        if let Some(active) = state.client.as_ref() {
            if active.protocol == protocol {
                return Ok(Arc::clone(&active.client));
            }
        }

        if let Some(previous) = state.client.take() {
            tracing::info!(
                "Switching message bus from {} to {}",
                previous.protocol,
                protocol
            );
            if let Err(e) = previous.client.end(true).await {
                tracing::warn!("Failed to close {} client: {}", previous.protocol, e);
            }
            previous.forwarder.abort();
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let client = connector
            .connect(inbound_tx, credentials)
            .map_err(RegistryError::Connect)?;
        let forwarder = tokio::spawn(forward_inbound(self.downgrade(), inbound_rx));

        tracing::info!("Connected {} message bus client", protocol);

        state.client = Some(ActiveClient {
            protocol,
            client: Arc::clone(&client),
            forwarder,
        });

        // Devices carried over from the previous client need their topics back.
        for (device, bindings) in &state.devices {
            if let Err(source) = client.subscribe(&device_topic(device)).await {
                let error = subscription_error(device, protocol, source);
                tracing::warn!("{}", error);
                for binding in bindings {
                    notices.failure(&binding.subscriber, SubscriptionStatus::SubscribeError, &error);
                }
            }
        }

        Ok(client)
    }

    /// Bind a subscriber to a device on the current client.
    ///
    /// The first subscriber of a device triggers a topic subscribe and is only
    /// bound once it is acknowledged; later subscribers join without a network
    /// call. On success the subscriber receives `Subscribed` and a
    /// [`TeardownHook`].
    ///
    /// # Errors
    ///
    /// * `RegistryError::NoClient` - no client has been acquired
    /// * `RegistryError::Subscription` - the topic subscribe was rejected; no
    ///   device entry is created
    pub async fn subscribe(
        &self,
        subscriber: Arc<dyn Subscriber>,
        request: SubscriptionRequest,
    ) -> Result<SubscribeOutcome> {
        let mut notices = Notices::default();
        let result = {
            let mut state = self.inner.state.lock().await;
            self.subscribe_locked(&mut state, subscriber, request, &mut notices)
                .await
        };
        notices.deliver();
        result
    }

    /// Acquire the client for `protocol` and subscribe in one step.
    pub async fn subscribe_on(
        &self,
        protocol: Protocol,
        connector: &dyn BusConnector,
        credentials: &BusCredentials,
        subscriber: Arc<dyn Subscriber>,
        request: SubscriptionRequest,
    ) -> Result<SubscribeOutcome> {
        let mut notices = Notices::default();
        let result = {
            let mut state = self.inner.state.lock().await;
            match self
                .acquire_locked(&mut state, protocol, connector, credentials, &mut notices)
                .await
            {
                Ok(_) => {
                    self.subscribe_locked(&mut state, subscriber, request, &mut notices)
                        .await
                }
                Err(error) => {
                    notices.failure(&subscriber, SubscriptionStatus::SubscribeError, &error);
                    Err(error)
                }
            }
        };
        notices.deliver();
        result
    }

    async fn subscribe_locked(
        &self,
        state: &mut RegistryState,
        subscriber: Arc<dyn Subscriber>,
        request: SubscriptionRequest,
        notices: &mut Notices,
    ) -> Result<SubscribeOutcome> {
        let device = request.device.clone();

        if state.is_member(&subscriber, &device) {
            tracing::debug!("Subscriber already bound to {}", device);
            return Ok(SubscribeOutcome::AlreadySubscribed);
        }

        if let Some(bindings) = state.devices.get_mut(&device) {
            bindings.push(SubscriberBinding::new(Arc::clone(&subscriber), &request));
            tracing::debug!(
                "Subscriber count for {}: {} -> {}",
                device,
                bindings.len() - 1,
                bindings.len()
            );
            self.confirm(&subscriber, device, notices);
            return Ok(SubscribeOutcome::Joined);
        }

        let Some(active) = state.client.as_ref() else {
            let error = RegistryError::NoClient;
            notices.failure(&subscriber, SubscriptionStatus::SubscribeError, &error);
            return Err(error);
        };
        let (client, protocol) = (Arc::clone(&active.client), active.protocol);

        let topic = device_topic(&device);
        if let Err(source) = client.subscribe(&topic).await {
            let error = subscription_error(&device, protocol, source);
            tracing::warn!("{}", error);
            notices.failure(&subscriber, SubscriptionStatus::SubscribeError, &error);

            if state.devices.is_empty() {
                self.request_teardown_locked(state);
            }
            return Err(error);
        }

        tracing::debug!("Subscribed {} on {}, subscriber count for {}: 0 -> 1", topic, protocol, device);
        state.devices.insert(
            device.clone(),
            vec![SubscriberBinding::new(Arc::clone(&subscriber), &request)],
        );
        self.confirm(&subscriber, device, notices);
        Ok(SubscribeOutcome::TopicSubscribed)
    }

    fn confirm(&self, subscriber: &Arc<dyn Subscriber>, device: DeviceName, notices: &mut Notices) {
        notices.status(subscriber, SubscriptionStatus::Subscribed);
        notices.teardown(subscriber, TeardownHook::new(self, subscriber, device));
    }

    /// Unbind a subscriber from a device.
    ///
    /// When the last subscriber leaves, the device topic is unsubscribed and,
    /// if no device is left at all, a client teardown is requested whatever
    /// the unsubscribe acknowledgement said. The returned future completes
    /// exactly once, after the device-level acknowledgement; it does not wait
    /// for the client teardown.
    ///
    /// Status changes reach the subscriber after the acknowledgement, so
    /// `UnsubscribeInProgress` is immediately followed by the final status.
    pub async fn unsubscribe(
        &self,
        subscriber: &Arc<dyn Subscriber>,
        device: &DeviceName,
    ) -> UnsubscribeOutcome {
        let mut notices = Notices::default();
        let outcome = {
            let mut state = self.inner.state.lock().await;
            self.unsubscribe_locked(&mut state, subscriber, device, &mut notices)
                .await
        };
        notices.deliver();
        outcome
    }

    async fn unsubscribe_locked(
        &self,
        state: &mut RegistryState,
        subscriber: &Arc<dyn Subscriber>,
        device: &DeviceName,
        notices: &mut Notices,
    ) -> UnsubscribeOutcome {
        let Some(bindings) = state.devices.get_mut(device) else {
            return UnsubscribeOutcome::NotSubscribed;
        };

        let before = bindings.len();
        bindings.retain(|binding| !same_subscriber(&binding.subscriber, subscriber));
        let remaining = bindings.len();
        if remaining == before {
            return UnsubscribeOutcome::NotSubscribed;
        }

        tracing::debug!("Subscriber count for {}: {} -> {}", device, before, remaining);

        if remaining > 0 {
            notices.status(subscriber, SubscriptionStatus::Unsubscribed);
            return UnsubscribeOutcome::Released { remaining };
        }

        state.devices.remove(device);

        let mut outcome = UnsubscribeOutcome::TopicReleased;
        if let Some(active) = state.client.as_ref() {
            let (client, protocol) = (Arc::clone(&active.client), active.protocol);
            notices.status(subscriber, SubscriptionStatus::UnsubscribeInProgress);

            if let Err(source) = client.unsubscribe(&device_topic(device)).await {
                let error = subscription_error(device, protocol, source);
                tracing::warn!("{}", error);
                notices.failure(subscriber, SubscriptionStatus::UnsubscribeError, &error);
                outcome = UnsubscribeOutcome::TopicReleaseFailed(error);
            }
        }

        if state.devices.is_empty() {
            self.request_teardown_locked(state);
        }

        if matches!(outcome, UnsubscribeOutcome::TopicReleased) {
            notices.status(subscriber, SubscriptionStatus::Unsubscribed);
        }
        outcome
    }

    /// Whether this exact subscriber is bound to the device.
    pub async fn is_subscribed(&self, subscriber: &Arc<dyn Subscriber>, device: &DeviceName) -> bool {
        self.inner.state.lock().await.is_member(subscriber, device)
    }

    /// Route one raw inbound message to the subscribers of its device.
    ///
    /// A payload that is not valid JSON is reported to every subscriber of
    /// every device, since the device cannot be known before parsing. Returns
    /// the number of subscribers that received output.
    pub async fn dispatch(&self, topic: &str, payload: &[u8]) -> usize {
        let envelope = match Envelope::from_slice(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                let error = RegistryError::Parse(e.to_string());
                tracing::warn!("Dropping message on {}: {}", topic, error);
                let subscribers = self.inner.state.lock().await.all_subscribers();
                for subscriber in subscribers {
                    subscriber.report_error(&error);
                }
                return 0;
            }
        };

        let Some(mut event) = envelope.into_event() else {
            tracing::trace!("Ignoring message without readings on {}", topic);
            return 0;
        };
        let Some(device) = device_from_topic(topic) else {
            tracing::debug!("No device segment in topic {}", topic);
            return 0;
        };

        let bindings = {
            let state = self.inner.state.lock().await;
            match state.devices.get(&device) {
                Some(bindings) => bindings.clone(),
                None => return 0,
            }
        };

        event.convert_readings();

        let mut delivered = 0;
        for binding in bindings {
            let outputs = binding.route(&event);
            if outputs.iter().any(Option::is_some) {
                binding.subscriber.deliver(outputs);
                binding
                    .subscriber
                    .report_status(SubscriptionStatus::LastReceived(Local::now()));
                delivered += 1;
            }
        }

        tracing::trace!("Event {} from {} delivered to {} subscriber(s)", event.id, device, delivered);
        delivered
    }

    /// Devices that currently have subscribers.
    pub async fn devices(&self) -> Vec<DeviceName> {
        self.inner.state.lock().await.devices.keys().cloned().collect()
    }

    /// Number of subscribers bound to a device.
    pub async fn subscriber_count(&self, device: &DeviceName) -> usize {
        self.inner
            .state
            .lock()
            .await
            .devices
            .get(device)
            .map_or(0, Vec::len)
    }

    /// Bindings of a device, in subscription order.
    pub async fn bindings(&self, device: &DeviceName) -> Vec<SubscriberBinding> {
        self.inner
            .state
            .lock()
            .await
            .devices
            .get(device)
            .cloned()
            .unwrap_or_default()
    }

    /// Protocol of the live client, if any.
    pub async fn active_protocol(&self) -> Option<Protocol> {
        self.inner
            .state
            .lock()
            .await
            .client
            .as_ref()
            .map(|active| active.protocol)
    }

    /// Current teardown phase.
    pub fn teardown_phase(&self) -> TeardownPhase {
        *self.inner.phase_tx.borrow()
    }

    /// Wait until no client teardown is pending.
    pub async fn wait_for_teardown(&self) {
        let mut rx = self.inner.phase_tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|phase| *phase == TeardownPhase::Idle).await;
    }

    /// Drop every binding and end the client immediately.
    ///
    /// Meant for process shutdown; subscribers receive `Unsubscribed`.
    pub async fn close(&self) {
        let (active, subscribers) = {
            let mut state = self.inner.state.lock().await;
            let subscribers = state.all_subscribers();
            state.devices.clear();
            (state.client.take(), subscribers)
        };

        for subscriber in subscribers {
            subscriber.report_status(SubscriptionStatus::Unsubscribed);
        }

        if let Some(active) = active {
            end_client(active).await;
        }
        self.wait_for_teardown().await;
    }

    fn set_phase(&self, state: &mut RegistryState, phase: TeardownPhase) {
        state.teardown = phase;
        self.inner.phase_tx.send_replace(phase);
    }

    /// Spawn a teardown unless one is already running.
    fn request_teardown_locked(&self, state: &mut RegistryState) -> bool {
        if state.teardown != TeardownPhase::Idle {
            tracing::debug!("Client teardown already in progress ({:?})", state.teardown);
            return false;
        }
        if state.client.is_none() {
            return false;
        }

        self.set_phase(state, TeardownPhase::ClosingRequested);
        let registry = self.clone();
        tokio::spawn(async move { registry.run_teardown().await });
        true
    }

    async fn run_teardown(&self) {
        loop {
            let active = {
                let mut state = self.inner.state.lock().await;
                // A subscriber may have arrived while this task was waiting.
                if !state.devices.is_empty() {
                    tracing::debug!("Client teardown aborted, devices were subscribed meanwhile");
                    self.set_phase(&mut state, TeardownPhase::Idle);
                    return;
                }
                self.set_phase(&mut state, TeardownPhase::Closing);
                state.client.take()
            };

            if let Some(active) = active {
                end_client(active).await;
            }

            let mut state = self.inner.state.lock().await;
            self.set_phase(&mut state, TeardownPhase::Closed);

            // A client created and emptied while `end` was in flight.
            if state.devices.is_empty() && state.client.is_some() {
                self.set_phase(&mut state, TeardownPhase::ClosingRequested);
                continue;
            }

            self.set_phase(&mut state, TeardownPhase::Idle);
            return;
        }
    }
}

async fn end_client(active: ActiveClient) {
    let protocol = active.protocol;
    match active.client.end(true).await {
        Ok(()) => tracing::info!("Closed {} message bus client", protocol),
        Err(source) => {
            let error = RegistryError::Teardown {
                protocol: protocol.as_str().to_uppercase(),
                source,
            };
            tracing::warn!("{}", error);
        }
    }
    active.forwarder.abort();
}

fn subscription_error(
    device: &DeviceName,
    protocol: Protocol,
    source: edgex_bus::BusError,
) -> RegistryError {
    RegistryError::Subscription {
        device: device.clone(),
        protocol: protocol.as_str().to_uppercase(),
        source,
    }
}

/// Pump inbound messages from a client into `dispatch` until the client's
/// sender goes away or the registry is dropped.
async fn forward_inbound(registry: Weak<RegistryInner>, mut inbound: InboundReceiver) {
    while let Some(message) = inbound.recv().await {
        let Some(inner) = registry.upgrade() else {
            break;
        };
        SubscriptionRegistry::from_inner(inner)
            .dispatch(&message.topic, &message.payload)
            .await;
    }
    tracing::trace!("Inbound forwarder finished");
}
