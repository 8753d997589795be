//! Model event publishing.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::broker::{Broker, Connection};
use crate::error::PubSubError;
use crate::subscription::ExchangeRef;
use crate::topic::{routing_key, Envelope};

/// Publishes model events to the topic exchange.
///
/// Cheap to clone; each clone acquires its own connection per publish, so
/// clones can publish from other threads while the owning `PubSub` drains.
pub struct Publisher<B> {
    broker: Arc<B>,
    url: Url,
    exchange: ExchangeRef,
}

impl<B> Clone for Publisher<B> {
    fn clone(&self) -> Self {
        Self {
            broker: Arc::clone(&self.broker),
            url: self.url.clone(),
            exchange: self.exchange.clone(),
        }
    }
}

impl<B: Broker> Publisher<B> {
    pub fn new(broker: Arc<B>, url: Url, exchange: ExchangeRef) -> Self {
        Self {
            broker,
            url,
            exchange,
        }
    }

    pub fn exchange(&self) -> &ExchangeRef {
        &self.exchange
    }

    /// Publish `{"object": obj}` with routing key `"{entity}.{event}"`.
    ///
    /// Success means the broker accepted the message, not that anyone
    /// handled it. Nothing is retried or buffered on failure.
    pub fn publish_model_event<T>(&self, entity: &str, event: &str, obj: &T) -> Result<(), PubSubError>
    where
        T: Serialize + ?Sized,
    {
        let routing_key = routing_key(entity, event);
        let body = Envelope::new(obj).to_vec()?;

        let mut conn = self.broker.acquire(&self.url)?;
        self.exchange.declare(&mut conn)?;
        conn.publish(self.exchange.name(), &routing_key, body)?;

        debug!(exchange = %self.exchange, routing_key = %routing_key, "published model event");
        Ok(())
    }
}
