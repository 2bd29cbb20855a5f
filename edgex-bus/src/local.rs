//! In-memory message bus.
//!
//! `LocalBus` behaves like a tiny broker living inside the process: clients
//! connect through the [`BusConnector`] interface, subscribe with MQTT-style
//! filters, and receive whatever is passed to [`LocalBus::publish`]. It keeps
//! call counters and can be told to reject the next subscribe, unsubscribe or
//! end request so hosts can exercise their error paths.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::client::{BusClient, BusConnector, InboundSender};
use crate::error::{BusError, Result};
use crate::topic::topic_matches;
use crate::types::{BusCredentials, BusMessage, Protocol};

/// Counters for the calls made against a [`LocalBus`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalBusStats {
    pub connects: usize,
    pub subscribes: usize,
    pub unsubscribes: usize,
    pub ends: usize,
}

#[derive(Default)]
struct Counters {
    connects: AtomicUsize,
    subscribes: AtomicUsize,
    unsubscribes: AtomicUsize,
    ends: AtomicUsize,
}

#[derive(Default)]
struct FailurePlan {
    subscribe: VecDeque<String>,
    unsubscribe: VecDeque<String>,
    end: VecDeque<String>,
}

struct ClientSlot {
    id: u64,
    credentials: BusCredentials,
    filters: RwLock<Vec<String>>,
    sender: Mutex<Option<InboundSender>>,
}

struct Shared {
    clients: RwLock<Vec<Arc<ClientSlot>>>,
    failures: Mutex<FailurePlan>,
    counters: Counters,
    ack_delay: RwLock<Duration>,
    next_id: AtomicU64,
}

/// In-memory broker and connector.
#[derive(Clone)]
pub struct LocalBus {
    protocol: Protocol,
    shared: Arc<Shared>,
}

impl LocalBus {
    /// Create a broker that registers itself under `protocol`.
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            shared: Arc::new(Shared {
                clients: RwLock::new(Vec::new()),
                failures: Mutex::new(FailurePlan::default()),
                counters: Counters::default(),
                ack_delay: RwLock::new(Duration::ZERO),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Deliver a message to every connected client with a matching filter.
    ///
    /// Returns the number of clients the message was handed to.
    pub fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> usize {
        let payload = payload.into();
        let clients = self.shared.clients.read();
        let mut delivered = 0;

        for slot in clients.iter() {
            let matches = slot
                .filters
                .read()
                .iter()
                .any(|filter| topic_matches(filter, topic));
            if !matches {
                continue;
            }
            if let Some(sender) = slot.sender.lock().as_ref() {
                if sender.send(BusMessage::new(topic, payload.clone())).is_ok() {
                    delivered += 1;
                }
            }
        }

        tracing::trace!("Published on {} to {} client(s)", topic, delivered);
        delivered
    }

    /// Reject the next subscribe request with `reason`.
    pub fn fail_next_subscribe(&self, reason: impl Into<String>) {
        self.shared.failures.lock().subscribe.push_back(reason.into());
    }

    /// Reject the next unsubscribe request with `reason`.
    pub fn fail_next_unsubscribe(&self, reason: impl Into<String>) {
        self.shared.failures.lock().unsubscribe.push_back(reason.into());
    }

    /// Reject the next end request with `reason`. The client is still closed.
    pub fn fail_next_end(&self, reason: impl Into<String>) {
        self.shared.failures.lock().end.push_back(reason.into());
    }

    /// Delay every acknowledgement by `delay`.
    pub fn set_ack_delay(&self, delay: Duration) {
        *self.shared.ack_delay.write() = delay;
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> LocalBusStats {
        let counters = &self.shared.counters;
        LocalBusStats {
            connects: counters.connects.load(Ordering::SeqCst),
            subscribes: counters.subscribes.load(Ordering::SeqCst),
            unsubscribes: counters.unsubscribes.load(Ordering::SeqCst),
            ends: counters.ends.load(Ordering::SeqCst),
        }
    }

    /// Number of clients that have not been ended.
    pub fn connected_clients(&self) -> usize {
        self.shared.clients.read().len()
    }

    /// Every filter currently held by a connected client.
    pub fn active_filters(&self) -> Vec<String> {
        self.shared
            .clients
            .read()
            .iter()
            .flat_map(|slot| slot.filters.read().clone())
            .collect()
    }

    /// Credentials the most recent connected client authenticated with.
    pub fn last_credentials(&self) -> Option<BusCredentials> {
        self.shared
            .clients
            .read()
            .last()
            .map(|slot| slot.credentials.clone())
    }
}

impl std::fmt::Debug for LocalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBus")
            .field("protocol", &self.protocol)
            .field("stats", &self.stats())
            .finish()
    }
}

impl BusConnector for LocalBus {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn connect(
        &self,
        inbound: InboundSender,
        credentials: &BusCredentials,
    ) -> Result<Arc<dyn BusClient>> {
        self.shared.counters.connects.fetch_add(1, Ordering::SeqCst);

        let slot = Arc::new(ClientSlot {
            id: self.shared.next_id.fetch_add(1, Ordering::SeqCst),
            credentials: credentials.clone(),
            filters: RwLock::new(Vec::new()),
            sender: Mutex::new(Some(inbound)),
        });
        self.shared.clients.write().push(Arc::clone(&slot));

        tracing::debug!("Local {} client {} connected", self.protocol, slot.id);

        Ok(Arc::new(LocalClient {
            slot,
            shared: Arc::clone(&self.shared),
        }))
    }
}

/// Client handle returned by [`LocalBus`].
pub struct LocalClient {
    slot: Arc<ClientSlot>,
    shared: Arc<Shared>,
}

impl LocalClient {
    async fn acknowledge(&self) {
        let delay = *self.shared.ack_delay.read();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn is_open(&self) -> bool {
        self.slot.sender.lock().is_some()
    }
}

#[async_trait]
impl BusClient for LocalClient {
    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.shared.counters.subscribes.fetch_add(1, Ordering::SeqCst);
        self.acknowledge().await;

        if !self.is_open() {
            return Err(BusError::Closed);
        }
        if let Some(reason) = self.shared.failures.lock().subscribe.pop_front() {
            return Err(BusError::Subscribe {
                topic: topic.to_string(),
                reason,
            });
        }

        let mut filters = self.slot.filters.write();
        if !filters.iter().any(|f| f == topic) {
            filters.push(topic.to_string());
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.shared.counters.unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.acknowledge().await;

        if !self.is_open() {
            return Err(BusError::Closed);
        }
        if let Some(reason) = self.shared.failures.lock().unsubscribe.pop_front() {
            return Err(BusError::Unsubscribe {
                topic: topic.to_string(),
                reason,
            });
        }

        self.slot.filters.write().retain(|f| f != topic);
        Ok(())
    }

    async fn end(&self, _force: bool) -> Result<()> {
        self.shared.counters.ends.fetch_add(1, Ordering::SeqCst);
        self.acknowledge().await;

        // Closing always happens; an injected failure only changes the reply.
        self.slot.sender.lock().take();
        self.slot.filters.write().clear();
        self.shared
            .clients
            .write()
            .retain(|slot| slot.id != self.slot.id);

        match self.shared.failures.lock().end.pop_front() {
            Some(reason) => Err(BusError::End(reason)),
            None => Ok(()),
        }
    }
}
