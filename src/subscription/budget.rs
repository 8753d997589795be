//! Restart budget - token bucket gating how often a drain may start.
//!
//! Each `drain()` spends one token before touching the broker. When the
//! broker is flapping and drains fail fast, the bucket empties and further
//! drains return immediately until tokens are earned back.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RestartBudget {
    /// Maximum tokens in the bucket
    capacity: u32,
    tokens: u32,
    /// Time to earn one token
    refill: Duration,
    last_refill: Instant,
}

impl RestartBudget {
    /// A full bucket of `capacity` tokens, one earned back every `refill`.
    pub fn new(capacity: u32, refill: Duration) -> Self {
        Self::starting_at(capacity, refill, Instant::now())
    }

    pub(crate) fn starting_at(capacity: u32, refill: Duration, now: Instant) -> Self {
        Self {
            capacity,
            tokens: capacity,
            refill,
            last_refill: now,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Spend one token. Returns `false` if the bucket is empty.
    pub fn try_acquire(&mut self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    pub(crate) fn try_acquire_at(&mut self, now: Instant) -> bool {
        self.refill_at(now);
        if self.tokens == 0 {
            return false;
        }
        self.tokens -= 1;
        true
    }

    /// Tokens available right now.
    pub fn available(&mut self) -> u32 {
        self.available_at(Instant::now())
    }

    pub(crate) fn available_at(&mut self, now: Instant) -> u32 {
        self.refill_at(now);
        self.tokens
    }

    /// Time until the next token, zero if one is available.
    pub fn retry_after(&mut self) -> Duration {
        self.retry_after_at(Instant::now())
    }

    pub(crate) fn retry_after_at(&mut self, now: Instant) -> Duration {
        self.refill_at(now);
        if self.tokens > 0 {
            return Duration::ZERO;
        }
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.refill.saturating_sub(elapsed)
    }

    fn refill_at(&mut self, now: Instant) {
        if self.tokens >= self.capacity || self.refill.is_zero() {
            self.tokens = self.capacity;
            self.last_refill = now;
            return;
        }

        let elapsed = now.saturating_duration_since(self.last_refill);
        let earned = (elapsed.as_nanos() / self.refill.as_nanos()).min(self.capacity as u128) as u32;
        if earned == 0 {
            return;
        }

        // Keep the partial progress towards the next token.
        self.tokens = (self.tokens + earned).min(self.capacity);
        if self.tokens == self.capacity {
            self.last_refill = now;
        } else {
            self.last_refill += self.refill * earned;
        }
    }
}
