//! Topic-based publish/subscribe over an AMQP-style broker.
//!
//! Model events go out on a durable topic exchange with routing key
//! `"{entity}.{event}"` and body `{"object": ...}`. Every subscriber callback
//! gets its own durable queue bound with its topic pattern, so each
//! subscriber sees every matching message. A drain loop consumes all
//! subscriptions until the broker goes quiet; a callback that fails is
//! disabled for the rest of that drain, and whatever it did not acknowledge
//! is redelivered on the next one.
//!
//! ```ignore
//! use topic_pubsub::{Config, PubSub};
//!
//! let mut pubsub = PubSub::new(Config::from_env()?, broker)?;
//! pubsub.subscribe("Order.*", on_order)?;
//!
//! let publisher = pubsub.publisher();
//! std::thread::spawn(move || publisher.publish_model_event("Order", "cancelled", &order));
//!
//! loop {
//!     pubsub.drain()?;
//! }
//! ```

pub mod broker;
mod config;
mod error;
mod publisher;
mod pubsub;
pub mod subscription;
pub mod telemetry;
mod topic;

pub use config::{
    redacted, Config, FailurePolicy, Verbosity, DEFAULT_IDLE_TIMEOUT, DEFAULT_RESTART_CAPACITY,
    DEFAULT_RESTART_REFILL, ENV_AMQP_URL, ENV_MODEL_EXCHANGE, ENV_NAMESPACE, ENV_VERBOSITY,
};
pub use error::{ConfigError, HandlerError, PubSubError};
pub use publisher::Publisher;
pub use pubsub::PubSub;
pub use subscription::{CallbackId, DrainReport};
pub use topic::{routing_key, Envelope};
