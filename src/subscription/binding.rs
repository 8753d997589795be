//! Queue binding resolution.
//!
//! Queue names are a function of *who* listens and *to what*, so the same
//! subscriber resubscribing to a topic always lands on the same durable
//! queue, while two subscribers on one topic each get their own queue and
//! both see every message.

use std::any;
use std::fmt;

use tracing::debug;

use crate::broker::{BrokerError, Connection, ExchangeKind};

/// Fully-qualified identity of a subscriber callback.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallbackId {
    module_path: String,
    name: String,
}

impl CallbackId {
    pub fn new(module_path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module_path: module_path.into(),
            name: name.into(),
        }
    }

    /// Identity from the callback's type name.
    ///
    /// Unique for fn items (`my_app::handlers::on_cancel`), including each
    /// instantiation of a generic fn (`handler<my_app::Order>`). Closures and
    /// fn pointers come out anonymous; see `is_anonymous`.
    pub fn of<F>() -> Self {
        Self::from_type_name(any::type_name::<F>())
    }

    fn from_type_name(type_name: &str) -> Self {
        // Generic arguments carry paths of their own.
        let path_end = type_name.find('<').unwrap_or(type_name.len());
        match type_name[..path_end].rfind("::") {
            Some(at) => Self::new(&type_name[..at], &type_name[at + 2..]),
            None => Self::new("", type_name),
        }
    }

    /// Whether this id fails to single out one callback.
    ///
    /// True for closures (every closure in a function is `{{closure}}`) and
    /// for fn pointers, which only name a signature.
    pub fn is_anonymous(&self) -> bool {
        let bare_name = self.name.split('<').next().unwrap_or_default();
        self.name.is_empty()
            || self.name.contains('{')
            || bare_name.contains('(')
            || self.module_path.contains(|c: char| c == '{' || c == '(')
    }

    pub fn module_path(&self) -> &str {
        &self.module_path
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module_path, self.name)
    }
}

/// A durable topic exchange, by effective name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExchangeRef {
    name: String,
}

impl ExchangeRef {
    pub const KIND: ExchangeKind = ExchangeKind::Topic;

    /// Effective exchange: `"{base}_{namespace}"`, or `base` when the
    /// namespace is empty.
    pub fn resolve(base: &str, namespace: &str) -> Self {
        let name = if namespace.is_empty() {
            base.to_string()
        } else {
            format!("{}_{}", base, namespace)
        };
        Self { name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare the exchange (topic, durable). Idempotent.
    pub fn declare<C: Connection>(&self, conn: &mut C) -> Result<(), BrokerError> {
        conn.declare_exchange(&self.name, Self::KIND, true)
    }
}

impl fmt::Display for ExchangeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A queue bound to the exchange for one (callback, topic) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueDescriptor {
    pub name: String,
    pub exchange: ExchangeRef,
    /// Always the subscribed topic, verbatim
    pub routing_key: String,
}

impl QueueDescriptor {
    /// `"[{namespace}]{module_path}.{name}::{topic}"`, without the bracketed
    /// prefix when the namespace is empty.
    pub fn resolve(
        callback: &CallbackId,
        topic: &str,
        exchange: &ExchangeRef,
        namespace: &str,
    ) -> Self {
        let name = if namespace.is_empty() {
            format!("{}::{}", callback, topic)
        } else {
            format!("[{}]{}::{}", namespace, callback, topic)
        };
        Self {
            name,
            exchange: exchange.clone(),
            routing_key: topic.to_string(),
        }
    }

    /// Declare the exchange, then the queue and its binding.
    ///
    /// Errors are returned as-is; nothing is retried.
    pub fn declare<C: Connection>(&self, conn: &mut C) -> Result<(), BrokerError> {
        self.exchange.declare(conn)?;
        conn.declare_queue(&self.name, self.exchange.name(), &self.routing_key)?;
        debug!(
            queue = %self.name,
            exchange = %self.exchange,
            routing_key = %self.routing_key,
            "declared queue binding"
        );
        Ok(())
    }
}
