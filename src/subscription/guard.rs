//! Callback guard - failure containment for one subscriber.
//!
//! ```text
//!   Enabled ──(callback fails)──▶ Disabled
//! ```
//!
//! `Disabled` is terminal for the guard. A drain builds fresh guards, so a
//! handler that failed gets another chance on the next drain, with the
//! message that broke it redelivered by the broker.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error};

use super::binding::CallbackId;
use crate::broker::{BrokerError, Connection, Delivery};
use crate::config::FailurePolicy;
use crate::error::HandlerError;

/// A subscriber callback: receives the decoded JSON body and the delivery.
pub type Callback = Arc<dyn Fn(&Value, &Delivery) -> Result<(), HandlerError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Enabled,
    Disabled,
}

/// Outcome of `CallbackGuard::evaluate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// The callback ran and succeeded.
    Handled,
    /// The callback failed; the guard is now disabled.
    Failed,
    /// The guard was already disabled; the callback was not called.
    Skipped,
}

/// Outcome of `CallbackGuard::ack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    /// Left unacknowledged on the broker.
    Pending,
    Requeued,
    Discarded,
}

/// Runs one subscriber callback per delivery and keeps its failures away
/// from the shared consume loop.
pub struct CallbackGuard {
    id: CallbackId,
    callback: Callback,
    policy: FailurePolicy,
    state: GuardState,
    /// Delivery tag of the message whose failure disabled the guard
    failed_on: Option<u64>,
}

impl CallbackGuard {
    pub fn new(id: CallbackId, callback: Callback, policy: FailurePolicy) -> Self {
        Self {
            id,
            callback,
            policy,
            state: GuardState::Enabled,
            failed_on: None,
        }
    }

    pub fn id(&self) -> &CallbackId {
        &self.id
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.state == GuardState::Enabled
    }

    /// Run the callback for a delivery if the guard is enabled.
    ///
    /// An `Err` from the callback, a panic inside it, or a body that is not
    /// JSON all disable the guard.
    pub fn evaluate(&mut self, delivery: &Delivery) -> Evaluation {
        if !self.is_enabled() {
            return Evaluation::Skipped;
        }

        match self.invoke(delivery) {
            Ok(()) => Evaluation::Handled,
            Err(err) => {
                error!(
                    callback = %self.id,
                    routing_key = %delivery.routing_key,
                    delivery_tag = delivery.delivery_tag,
                    redelivered = delivery.redelivered,
                    error = %err,
                    "subscriber failed, disabling it for the rest of this drain"
                );
                self.state = GuardState::Disabled;
                self.failed_on = Some(delivery.delivery_tag);
                Evaluation::Failed
            }
        }
    }

    fn invoke(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        let body: Value = serde_json::from_slice(&delivery.body)?;
        panic::catch_unwind(AssertUnwindSafe(|| (self.callback)(&body, delivery)))
            .unwrap_or_else(|payload| Err(HandlerError::Panicked(panic_message(payload))))
    }

    /// Settle a delivery after `evaluate`.
    ///
    /// Enabled guards acknowledge. A disabled guard never acknowledges; the
    /// delivery that disabled it is handled per the failure policy and every
    /// later one is left pending.
    pub fn ack<C: Connection>(
        &self,
        conn: &mut C,
        delivery: &Delivery,
    ) -> Result<Settlement, BrokerError> {
        if self.is_enabled() {
            conn.ack(delivery)?;
            return Ok(Settlement::Acked);
        }

        if self.failed_on == Some(delivery.delivery_tag) {
            match self.policy {
                FailurePolicy::LeavePending => {}
                FailurePolicy::Requeue => {
                    conn.reject(delivery, true)?;
                    return Ok(Settlement::Requeued);
                }
                FailurePolicy::Discard => {
                    conn.reject(delivery, false)?;
                    return Ok(Settlement::Discarded);
                }
            }
        }

        debug!(
            callback = %self.id,
            delivery_tag = delivery.delivery_tag,
            "ack skipped, handler already failed"
        );
        Ok(Settlement::Pending)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
