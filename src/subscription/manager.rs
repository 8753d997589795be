//! Consumer manager - turns bindings into one bounded consume loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use super::binding::{CallbackId, QueueDescriptor};
use super::budget::RestartBudget;
use super::guard::{Callback, CallbackGuard, Evaluation, Settlement};
use crate::broker::{Broker, BrokerError, Connection};
use crate::config::FailurePolicy;
use crate::error::PubSubError;

/// A subscribed callback and the queue it consumes.
#[derive(Clone)]
pub struct Binding {
    pub queue: QueueDescriptor,
    pub callback_id: CallbackId,
    callback: Callback,
}

impl Binding {
    pub fn new(queue: QueueDescriptor, callback_id: CallbackId, callback: Callback) -> Self {
        Self {
            queue,
            callback_id,
            callback,
        }
    }
}

/// Result of one `drain()` call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// The restart budget was empty; the broker was not contacted.
    pub throttled: bool,
    /// Consumers opened (one per binding)
    pub consumers: usize,
    pub delivered: usize,
    /// Deliveries whose callback succeeded (and were acknowledged)
    pub handled: usize,
    /// Deliveries whose callback failed, disabling its guard
    pub failed: usize,
    /// Deliveries that reached an already disabled guard
    pub skipped: usize,
    pub requeued: usize,
    pub discarded: usize,
}

/// Owns the binding list and runs drains over it.
///
/// Bindings live as long as the manager. Guards and broker consumers live
/// for a single `drain()`.
pub struct ConsumerManager {
    bindings: Vec<Binding>,
    budget: RestartBudget,
    idle_timeout: Duration,
    policy: FailurePolicy,
}

impl ConsumerManager {
    pub fn new(idle_timeout: Duration, budget: RestartBudget, policy: FailurePolicy) -> Self {
        Self {
            bindings: Vec::new(),
            budget,
            idle_timeout,
            policy,
        }
    }

    /// Register a binding. No broker interaction.
    pub fn add_binding(&mut self, binding: Binding) {
        self.bindings.push(binding);
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Declare every binding's exchange, queue and routing key.
    ///
    /// Stops at the first failure; what was already declared stays declared.
    pub fn declare_all<C: Connection>(&self, conn: &mut C) -> Result<(), BrokerError> {
        for binding in &self.bindings {
            binding.queue.declare(conn)?;
        }
        Ok(())
    }

    /// Consume every binding until the broker has been idle for
    /// `idle_timeout`, then return.
    ///
    /// Returns a throttled report without contacting the broker when the
    /// restart budget is empty. Broker failures are returned, never retried.
    pub fn drain<B: Broker>(&mut self, broker: &B, url: &Url) -> Result<DrainReport, PubSubError> {
        if !self.budget.try_acquire() {
            warn!(
                retry_after_ms = self.budget.retry_after().as_millis() as u64,
                "drain throttled, restart budget exhausted"
            );
            return Ok(DrainReport {
                throttled: true,
                ..Default::default()
            });
        }

        match self.consume_until_idle(broker, url) {
            Ok(report) => {
                info!(
                    consumers = report.consumers,
                    delivered = report.delivered,
                    handled = report.handled,
                    failed = report.failed,
                    skipped = report.skipped,
                    "drain finished"
                );
                Ok(report)
            }
            Err(err) => {
                warn!(error = %err, "drain aborted");
                Err(err.into())
            }
        }
    }

    fn consume_until_idle<B: Broker>(
        &self,
        broker: &B,
        url: &Url,
    ) -> Result<DrainReport, BrokerError> {
        let mut conn = broker.acquire(url)?;
        self.declare_all(&mut conn)?;

        let mut guards: HashMap<String, CallbackGuard> = HashMap::with_capacity(self.bindings.len());
        for binding in &self.bindings {
            let tag = conn.consume(&binding.queue.name)?;
            debug!(queue = %binding.queue.name, consumer_tag = %tag, "consuming");
            guards.insert(
                tag,
                CallbackGuard::new(
                    binding.callback_id.clone(),
                    Arc::clone(&binding.callback),
                    self.policy,
                ),
            );
        }

        let mut report = DrainReport {
            consumers: guards.len(),
            ..Default::default()
        };

        while let Some(delivery) = conn.next_delivery(self.idle_timeout)? {
            report.delivered += 1;
            let Some(guard) = guards.get_mut(&delivery.consumer_tag) else {
                warn!(
                    consumer_tag = %delivery.consumer_tag,
                    delivery_tag = delivery.delivery_tag,
                    "delivery for unknown consumer left pending"
                );
                continue;
            };

            match guard.evaluate(&delivery) {
                Evaluation::Handled => {}
                Evaluation::Failed => report.failed += 1,
                Evaluation::Skipped => report.skipped += 1,
            }
            match guard.ack(&mut conn, &delivery)? {
                Settlement::Acked => report.handled += 1,
                Settlement::Pending => {}
                Settlement::Requeued => report.requeued += 1,
                Settlement::Discarded => report.discarded += 1,
            }
        }

        Ok(report)
    }
}
