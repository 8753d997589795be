//! Error types for the pub/sub client.
//!
//! Three layers, matching where a failure is allowed to travel:
//! - `ConfigError`: raised synchronously while building a `PubSub`
//! - `PubSubError`: returned to the immediate caller of `subscribe`,
//!   `publish_model_event` and `drain`
//! - `HandlerError`: returned by subscriber callbacks, contained by the
//!   callback guard and never propagated

use std::error::Error;

use thiserror::Error;

use crate::broker::BrokerError;

/// Invalid or missing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("invalid broker url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("unsupported broker url scheme: {0}")]
    UnsupportedScheme(String),
    #[error("idle timeout must be greater than zero")]
    ZeroIdleTimeout,
    #[error("restart budget capacity must be greater than zero")]
    ZeroBudgetCapacity,
    /// `subscribe` was given a closure or fn pointer; its queue name would
    /// collide with other anonymous callbacks.
    #[error("callback {0} has no stable name, subscribe it with subscribe_as")]
    AnonymousCallback(String),
}

/// Error type for facade operations.
#[derive(Debug, Error)]
pub enum PubSubError {
    /// Construction was attempted with an invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
    /// A connection, declare or publish round-trip did not complete.
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(#[from] BrokerError),
    /// The payload could not be encoded as JSON.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PubSubError {
    /// Whether calling again later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, PubSubError::BrokerUnavailable(_))
    }
}

/// Error returned by a subscriber callback.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Business logic refused the message.
    #[error("handler failed: {0}")]
    Failed(String),
    /// The message body could not be decoded.
    #[error("decode failed: {0}")]
    Decode(#[from] serde_json::Error),
    /// The callback panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
    #[error("handler error: {0}")]
    Other(Box<dyn Error + Send + Sync>),
}

impl HandlerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        HandlerError::Failed(msg.into())
    }

    pub fn other<E>(err: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        HandlerError::Other(Box::new(err))
    }
}
