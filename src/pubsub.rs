//! PubSub - single entry point for subscribing, publishing and draining.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::info;
use url::Url;

use crate::broker::{Broker, Delivery};
use crate::config::{redacted, Config};
use crate::error::{ConfigError, HandlerError, PubSubError};
use crate::publisher::Publisher;
use crate::subscription::{
    Binding, CallbackId, ConsumerManager, DrainReport, ExchangeRef, QueueDescriptor, RestartBudget,
};

/// Pub/sub client bound to one broker, exchange and namespace.
///
/// Each instance owns its bindings, so several independent clients can live
/// in one process. The client only emits `tracing` events; a process without
/// a subscriber of its own can print them with
/// `telemetry::init(config.verbosity)`.
///
/// ## Example
///
/// ```
/// use topic_pubsub::{Config, HandlerError, PubSub};
/// use topic_pubsub::broker::{Delivery, InMemoryBroker};
/// use serde_json::{json, Value};
/// use std::time::Duration;
///
/// fn on_cancelled(body: &Value, _delivery: &Delivery) -> Result<(), HandlerError> {
///     assert_eq!(body["object"]["id"], 1);
///     Ok(())
/// }
///
/// let config = Config::new("memory://local", "model_event_exchange")
///     .with_idle_timeout(Duration::from_millis(20));
/// let mut pubsub = PubSub::new(config, InMemoryBroker::new()).unwrap();
///
/// // Returns the callback, so it stays directly callable
/// let handler = pubsub.subscribe("Order.cancelled", on_cancelled).unwrap();
///
/// pubsub.publish_model_event("Order", "cancelled", &json!({ "id": 1 })).unwrap();
/// let report = pubsub.drain().unwrap();
/// assert_eq!(report.handled, 1);
/// # let _ = handler;
/// ```
pub struct PubSub<B: Broker> {
    config: Config,
    url: Url,
    broker: Arc<B>,
    exchange: ExchangeRef,
    publisher: Publisher<B>,
    consumers: ConsumerManager,
}

impl<B: Broker> PubSub<B> {
    /// Validate the configuration and bind to `broker`.
    ///
    /// The effective exchange name is fixed here; the namespace cannot
    /// change afterwards.
    pub fn new(config: Config, broker: B) -> Result<Self, PubSubError> {
        Self::with_shared_broker(config, Arc::new(broker))
    }

    /// Like `new`, sharing a broker (connection pool) with other clients.
    pub fn with_shared_broker(config: Config, broker: Arc<B>) -> Result<Self, PubSubError> {
        let url = config.validate()?;
        let exchange = ExchangeRef::resolve(&config.exchange, &config.namespace);
        let publisher = Publisher::new(Arc::clone(&broker), url.clone(), exchange.clone());
        let consumers = ConsumerManager::new(
            config.idle_timeout,
            RestartBudget::new(config.restart_capacity, config.restart_refill),
            config.failure_policy,
        );

        info!(
            broker = %redacted(&url),
            exchange = %exchange,
            namespace = %config.namespace,
            verbosity = %config.verbosity,
            "pubsub client configured"
        );

        Ok(Self {
            config,
            url,
            broker,
            exchange,
            publisher,
            consumers,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Effective exchange (`"{base}_{namespace}"` or `base`).
    pub fn exchange(&self) -> &ExchangeRef {
        &self.exchange
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    pub fn bindings(&self) -> &[Binding] {
        self.consumers.bindings()
    }

    /// Acquire a scoped broker connection, released when dropped.
    pub fn acquire(&self) -> Result<B::Connection, PubSubError> {
        Ok(self.broker.acquire(&self.url)?)
    }

    /// Subscribe a callback to a topic pattern and return it unchanged.
    ///
    /// The queue is named after the callback's fully-qualified path and the
    /// topic, and declared on the broker right away. Subscribing the same fn
    /// to the same topic again reuses its queue.
    ///
    /// Closures and fn pointers have no such path and are refused with
    /// `ConfigError::AnonymousCallback`; register them with `subscribe_as`.
    pub fn subscribe<F>(&mut self, topic: &str, callback: F) -> Result<F, PubSubError>
    where
        F: Fn(&Value, &Delivery) -> Result<(), HandlerError> + Clone + Send + Sync + 'static,
    {
        let id = CallbackId::of::<F>();
        if id.is_anonymous() {
            return Err(ConfigError::AnonymousCallback(id.to_string()).into());
        }
        self.subscribe_as(topic, id, callback)
    }

    /// Subscribe with an explicit callback identity.
    pub fn subscribe_as<F>(
        &mut self,
        topic: &str,
        id: CallbackId,
        callback: F,
    ) -> Result<F, PubSubError>
    where
        F: Fn(&Value, &Delivery) -> Result<(), HandlerError> + Clone + Send + Sync + 'static,
    {
        let queue = QueueDescriptor::resolve(&id, topic, &self.exchange, &self.config.namespace);

        let mut conn = self.acquire()?;
        queue.declare(&mut conn)?;
        drop(conn);

        info!(callback = %id, queue = %queue.name, topic, "subscribed");
        self.consumers
            .add_binding(Binding::new(queue, id, Arc::new(callback.clone())));
        Ok(callback)
    }

    /// Publish a model event. See `Publisher::publish_model_event`.
    pub fn publish_model_event<T>(&self, entity: &str, event: &str, obj: &T) -> Result<(), PubSubError>
    where
        T: Serialize + ?Sized,
    {
        self.publisher.publish_model_event(entity, event, obj)
    }

    /// A publishing handle usable from other threads.
    pub fn publisher(&self) -> Publisher<B> {
        self.publisher.clone()
    }

    /// Run one drain tick: consume all subscriptions until the broker has
    /// been idle for the configured idle timeout.
    ///
    /// Call repeatedly from a dedicated loop. After a broker failure the
    /// restart budget throttles how often calls actually reach the broker.
    pub fn drain(&mut self) -> Result<DrainReport, PubSubError> {
        self.consumers.drain(self.broker.as_ref(), &self.url)
    }
}
