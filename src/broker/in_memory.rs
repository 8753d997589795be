//! In-memory broker for testing and single-process scenarios.
//!
//! This module provides a thread-safe broker that implements `Broker` and
//! `Connection` with AMQP topic-exchange semantics, useful for:
//! - Unit and integration testing without an external broker
//! - Single-process applications
//! - Simulating broker outages (`disconnect` / `reconnect`)
//!
//! Every publish and ack is also recorded for introspection. The records keep
//! full bodies and grow until `clear_history` is called, so long-running
//! processes should clear them periodically.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use url::Url;

use super::{topic_matches, Broker, BrokerError, Connection, Delivery, ExchangeKind};

/// A message accepted by `publish`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishRecord {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
}

/// A delivery that was acknowledged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AckRecord {
    pub queue: String,
    pub routing_key: String,
    pub body: Vec<u8>,
}

#[derive(Clone, Debug)]
struct Message {
    exchange: String,
    routing_key: String,
    body: Vec<u8>,
    redelivered: bool,
}

struct Exchange {
    kind: ExchangeKind,
    durable: bool,
    /// (binding key, queue name)
    bindings: Vec<(String, String)>,
}

impl Exchange {
    fn routes(&self, binding_key: &str, routing_key: &str) -> bool {
        match self.kind {
            ExchangeKind::Topic => topic_matches(binding_key, routing_key),
            ExchangeKind::Direct => binding_key == routing_key,
            ExchangeKind::Fanout => true,
        }
    }
}

struct Unacked {
    connection: u64,
    queue: String,
    message: Message,
}

#[derive(Default)]
struct State {
    offline: bool,
    /// Bumped by every disconnect; connections from older generations fail.
    generation: u64,
    exchanges: HashMap<String, Exchange>,
    queues: BTreeMap<String, VecDeque<Message>>,
    unacked: BTreeMap<u64, Unacked>,
    next_delivery_tag: u64,
    next_connection: u64,
    published: Vec<PublishRecord>,
    acknowledged: Vec<AckRecord>,
    discarded: usize,
    operations: u64,
}

impl State {
    fn requeue(&mut self, queue: &str, mut message: Message) {
        message.redelivered = true;
        if let Some(ready) = self.queues.get_mut(queue) {
            ready.push_front(message);
        }
    }
}

/// In-memory broker for testing and single-process scenarios.
///
/// Features:
/// - Thread-safe (can be shared across threads via `Clone`)
/// - Topic, direct and fanout exchanges; every bound queue gets a copy
/// - Per-queue FIFO; consumers on one connection are served round-robin
/// - Deliveries left unacknowledged are requeued when their connection drops
///
/// ## Example
///
/// ```
/// use topic_pubsub::broker::{Broker, Connection, ExchangeKind, InMemoryBroker};
/// use std::time::Duration;
///
/// let broker = InMemoryBroker::new();
/// let url = "memory://local".parse().unwrap();
/// let mut conn = broker.acquire(&url).unwrap();
///
/// conn.declare_exchange("events", ExchangeKind::Topic, true).unwrap();
/// conn.declare_queue("audit", "events", "Order.#").unwrap();
/// conn.publish("events", "Order.cancelled", br#"{"object":{}}"#.to_vec()).unwrap();
///
/// conn.consume("audit").unwrap();
/// let delivery = conn.next_delivery(Duration::from_millis(10)).unwrap().unwrap();
/// assert_eq!(delivery.routing_key, "Order.cancelled");
/// conn.ack(&delivery).unwrap();
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<State>>,
}

impl InMemoryBroker {
    /// Create a new, online, empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    /// Drop every open connection and refuse new ones until `reconnect`.
    pub fn disconnect(&self) {
        let mut state = self.state();
        state.offline = true;
        state.generation += 1;
    }

    /// Accept connections again.
    pub fn reconnect(&self) {
        self.state().offline = false;
    }

    pub fn is_online(&self) -> bool {
        !self.state().offline
    }

    /// Names of all declared queues, sorted.
    pub fn queue_names(&self) -> Vec<String> {
        self.state().queues.keys().cloned().collect()
    }

    /// Kind of a declared exchange.
    pub fn exchange_kind(&self, name: &str) -> Option<ExchangeKind> {
        self.state().exchanges.get(name).map(|e| e.kind)
    }

    /// Whether a declared exchange is durable.
    pub fn exchange_durable(&self, name: &str) -> Option<bool> {
        self.state().exchanges.get(name).map(|e| e.durable)
    }

    /// Binding keys of a queue on an exchange.
    pub fn bindings(&self, exchange: &str, queue: &str) -> Vec<String> {
        self.state()
            .exchanges
            .get(exchange)
            .map(|e| {
                e.bindings
                    .iter()
                    .filter(|(_, q)| q == queue)
                    .map(|(key, _)| key.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Messages waiting on a queue (not handed out).
    pub fn ready_count(&self, queue: &str) -> usize {
        self.state().queues.get(queue).map_or(0, VecDeque::len)
    }

    /// Messages of a queue handed out and not yet acked or rejected.
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.state()
            .unacked
            .values()
            .filter(|u| u.queue == queue)
            .count()
    }

    /// Every message accepted by `publish`, in order.
    pub fn published(&self) -> Vec<PublishRecord> {
        self.state().published.clone()
    }

    /// Every acknowledged delivery, in order.
    pub fn acknowledged(&self) -> Vec<AckRecord> {
        self.state().acknowledged.clone()
    }

    /// Drop the publish and ack records. Queued messages are untouched.
    pub fn clear_history(&self) {
        let mut state = self.state();
        state.published = Vec::new();
        state.acknowledged = Vec::new();
    }

    /// Number of deliveries rejected without requeue.
    pub fn discarded(&self) -> usize {
        self.state().discarded
    }

    /// Count of broker interactions (acquires plus connection operations).
    pub fn operations(&self) -> u64 {
        self.state().operations
    }
}

impl Broker for InMemoryBroker {
    type Connection = InMemoryConnection;

    fn acquire(&self, _url: &Url) -> Result<InMemoryConnection, BrokerError> {
        let mut state = self.state();
        state.operations += 1;
        if state.offline {
            return Err(BrokerError::Unavailable("broker offline".to_string()));
        }
        state.next_connection += 1;
        Ok(InMemoryConnection {
            state: Arc::clone(&self.state),
            id: state.next_connection,
            generation: state.generation,
            consumers: Vec::new(),
            cursor: 0,
        })
    }
}

/// A scoped connection to an `InMemoryBroker`.
pub struct InMemoryConnection {
    state: Arc<Mutex<State>>,
    id: u64,
    generation: u64,
    /// (consumer tag, queue name)
    consumers: Vec<(String, String)>,
    /// Round-robin position over `consumers`
    cursor: usize,
}

impl InMemoryConnection {
    /// Lock the broker state for one operation, failing if this connection
    /// was cut by `disconnect`.
    fn open(&self) -> Result<MutexGuard<'_, State>, BrokerError> {
        let mut state = lock(&self.state);
        state.operations += 1;
        if state.offline || state.generation != self.generation {
            return Err(BrokerError::Disconnected);
        }
        Ok(state)
    }

    fn try_deliver(&mut self) -> Result<Option<Delivery>, BrokerError> {
        let mut state = lock(&self.state);
        if state.offline || state.generation != self.generation {
            return Err(BrokerError::Disconnected);
        }

        for offset in 0..self.consumers.len() {
            let index = (self.cursor + offset) % self.consumers.len();
            let (tag, queue) = &self.consumers[index];
            let Some(message) = state.queues.get_mut(queue).and_then(VecDeque::pop_front) else {
                continue;
            };

            state.next_delivery_tag += 1;
            let delivery_tag = state.next_delivery_tag;
            let delivery = Delivery {
                delivery_tag,
                consumer_tag: tag.clone(),
                exchange: message.exchange.clone(),
                routing_key: message.routing_key.clone(),
                redelivered: message.redelivered,
                body: message.body.clone(),
            };
            state.unacked.insert(
                delivery_tag,
                Unacked {
                    connection: self.id,
                    queue: queue.clone(),
                    message,
                },
            );
            self.cursor = (index + 1) % self.consumers.len();
            return Ok(Some(delivery));
        }

        Ok(None)
    }

    fn settle(&self, state: &mut State, delivery: &Delivery) -> Result<Unacked, BrokerError> {
        match state.unacked.get(&delivery.delivery_tag) {
            Some(u) if u.connection == self.id => {}
            _ => return Err(BrokerError::UnknownDelivery(delivery.delivery_tag)),
        }
        state
            .unacked
            .remove(&delivery.delivery_tag)
            .ok_or(BrokerError::UnknownDelivery(delivery.delivery_tag))
    }
}

impl Connection for InMemoryConnection {
    fn declare_exchange(
        &mut self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError> {
        let mut state = self.open()?;
        if let Some(existing) = state.exchanges.get(name) {
            if existing.kind != kind || existing.durable != durable {
                return Err(BrokerError::Rejected(format!(
                    "exchange {} already declared as {} (durable={})",
                    name, existing.kind, existing.durable
                )));
            }
            return Ok(());
        }
        state.exchanges.insert(
            name.to_string(),
            Exchange {
                kind,
                durable,
                bindings: Vec::new(),
            },
        );
        Ok(())
    }

    fn declare_queue(
        &mut self,
        name: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        let mut state = self.open()?;
        let bindings = &mut state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::UnknownExchange(exchange.to_string()))?
            .bindings;
        if !bindings.iter().any(|(k, q)| k == routing_key && q == name) {
            bindings.push((routing_key.to_string(), name.to_string()));
        }
        state.queues.entry(name.to_string()).or_default();
        Ok(())
    }

    fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
    ) -> Result<(), BrokerError> {
        let mut state = self.open()?;
        let ex = state
            .exchanges
            .get(exchange)
            .ok_or_else(|| BrokerError::UnknownExchange(exchange.to_string()))?;

        let mut targets: Vec<String> = ex
            .bindings
            .iter()
            .filter(|(key, _)| ex.routes(key, routing_key))
            .map(|(_, queue)| queue.clone())
            .collect();
        targets.sort();
        targets.dedup();

        // Unroutable messages are dropped, as on a real broker.
        for queue in targets {
            if let Some(ready) = state.queues.get_mut(&queue) {
                ready.push_back(Message {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    body: body.clone(),
                    redelivered: false,
                });
            }
        }
        state.published.push(PublishRecord {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body,
        });
        Ok(())
    }

    fn consume(&mut self, queue: &str) -> Result<String, BrokerError> {
        let state = self.open()?;
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::UnknownQueue(queue.to_string()));
        }
        drop(state);

        let tag = format!("ctag-{}.{}", self.id, self.consumers.len() + 1);
        self.consumers.push((tag.clone(), queue.to_string()));
        Ok(tag)
    }

    fn next_delivery(&mut self, timeout: Duration) -> Result<Option<Delivery>, BrokerError> {
        lock(&self.state).operations += 1;
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(delivery) = self.try_deliver()? {
                return Ok(Some(delivery));
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }

            // Small sleep to avoid busy-waiting
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        let mut state = self.open()?;
        let settled = self.settle(&mut state, delivery)?;
        state.acknowledged.push(AckRecord {
            queue: settled.queue,
            routing_key: settled.message.routing_key,
            body: settled.message.body,
        });
        Ok(())
    }

    fn reject(&mut self, delivery: &Delivery, requeue: bool) -> Result<(), BrokerError> {
        let mut state = self.open()?;
        let settled = self.settle(&mut state, delivery)?;
        if requeue {
            state.requeue(&settled.queue, settled.message);
        } else {
            state.discarded += 1;
        }
        Ok(())
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        let held: Vec<u64> = state
            .unacked
            .iter()
            .filter(|(_, u)| u.connection == self.id)
            .map(|(tag, _)| *tag)
            .collect();

        // Newest first so the oldest ends up at the head of its queue.
        for tag in held.into_iter().rev() {
            if let Some(u) = state.unacked.remove(&tag) {
                state.requeue(&u.queue, u.message);
            }
        }
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
