//! Broker boundary - connection abstractions for AMQP-style brokers.
//!
//! The pub/sub client never talks to a wire protocol directly. Everything it
//! needs from a broker goes through two traits:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PubSub (per application)                  │
//! │  - subscribe() / publish_model_event() / drain()            │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Broker + Connection Traits                   │
//! │  Broker: acquire(url) -> scoped Connection                  │
//! │  Connection: declare / publish / consume / next_delivery    │
//! │              ack / reject                                   │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                    │
//!          ▼                                    ▼
//! ┌──────────────────┐              ┌─────────────────────────┐
//! │  InMemoryBroker  │              │  AMQP client adapter    │
//! │   (included)     │              │      (external)         │
//! └──────────────────┘              └─────────────────────────┘
//! ```
//!
//! Connections are scoped: dropping one releases it, and the broker puts any
//! delivery that was handed out on it but never acknowledged back on its
//! queue.

mod connection;
mod error;
#[cfg(feature = "memory")]
mod in_memory;
mod pattern;

pub use connection::{Broker, Connection, Delivery, ExchangeKind};
pub use error::BrokerError;
#[cfg(feature = "memory")]
pub use in_memory::{AckRecord, InMemoryBroker, InMemoryConnection, PublishRecord};
pub use pattern::topic_matches;
