//! Core broker traits.

use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use url::Url;

use super::BrokerError;
use crate::topic::Envelope;

/// Exchange routing behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    /// Route on routing-key patterns (`*` one word, `#` zero or more words).
    Topic,
    /// Route on exact routing-key equality.
    Direct,
    /// Route to every bound queue.
    Fanout,
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeKind::Topic => write!(f, "topic"),
            ExchangeKind::Direct => write!(f, "direct"),
            ExchangeKind::Fanout => write!(f, "fanout"),
        }
    }
}

/// A message handed to a consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// Connection-unique tag used to ack or reject this delivery
    pub delivery_tag: u64,
    /// Tag of the consumer the broker delivered to
    pub consumer_tag: String,
    pub exchange: String,
    pub routing_key: String,
    /// Set when the broker has handed this message out before
    pub redelivered: bool,
    /// Raw message body (JSON for model events)
    pub body: Vec<u8>,
}

impl Delivery {
    /// Get the body as a string (if valid UTF-8).
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Decode the whole body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Decode a model event body and unwrap its `object`.
    pub fn object<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        Envelope::<T>::from_slice(&self.body).map(Envelope::into_inner)
    }
}

/// Source of scoped broker connections (usually a pool).
///
/// Implementations might include:
/// - `InMemoryBroker` - For testing and single-process scenarios
/// - an adapter over an async AMQP client driving its own runtime
pub trait Broker: Send + Sync {
    type Connection: Connection;

    /// Acquire a connection, blocking until one is available.
    ///
    /// The connection is released when dropped.
    fn acquire(&self, url: &Url) -> Result<Self::Connection, BrokerError>;
}

/// One acquired broker connection.
///
/// Deliveries from all consumers opened on a connection share one event
/// channel, read with `next_delivery`.
pub trait Connection {
    /// Declare an exchange. Redeclaring with identical settings is a no-op.
    fn declare_exchange(
        &mut self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError>;

    /// Declare a durable queue and bind it to `exchange` with `routing_key`.
    fn declare_queue(
        &mut self,
        name: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError>;

    /// Publish a body to an exchange.
    fn publish(&mut self, exchange: &str, routing_key: &str, body: Vec<u8>)
        -> Result<(), BrokerError>;

    /// Start consuming a queue. Returns the consumer tag that will be set on
    /// its deliveries.
    fn consume(&mut self, queue: &str) -> Result<String, BrokerError>;

    /// Wait up to `timeout` for the next delivery on any consumer.
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    fn next_delivery(&mut self, timeout: Duration) -> Result<Option<Delivery>, BrokerError>;

    /// Acknowledge a delivery, removing it from its queue.
    fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Negatively acknowledge a delivery. With `requeue` the broker hands it
    /// out again, otherwise it is dropped.
    fn reject(&mut self, delivery: &Delivery, requeue: bool) -> Result<(), BrokerError>;
}
