//! Subscriptions - queue bindings, guarded callbacks and the drain loop.
//!
//! ## Lifecycle
//!
//! ```text
//! subscribe(topic, f) ──▶ QueueDescriptor::resolve + declare ──▶ Binding
//!                                                                   │
//! drain() ──▶ RestartBudget ──▶ declare_all ──▶ one consumer + fresh
//!                                               CallbackGuard per Binding
//!                                                      │
//!                  next_delivery(idle_timeout) ◀───────┘
//!                     │ Some: guard.evaluate + guard.ack, repeat
//!                     │ None: return DrainReport
//! ```

mod binding;
mod budget;
mod guard;
mod manager;

pub use binding::{CallbackId, ExchangeRef, QueueDescriptor};
pub use budget::RestartBudget;
pub use guard::{Callback, CallbackGuard, Evaluation, GuardState, Settlement};
pub use manager::{Binding, ConsumerManager, DrainReport};
