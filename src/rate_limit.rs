//! Per-connection leaky bucket rate limiting.
//!
//! Each connection carries two independent leaky buckets — a coarse
//! per-minute tier and a fine per-second tier — combined with AND semantics:
//! a request is admitted only when both tiers individually admit it. Buckets
//! are created fresh on connect and dropped with the connection.

use std::time::Duration;

use crate::queue::now_epoch_ms;
use crate::settings::RateLimitSettings;

/// Outcome of a single admission check.
///
/// `next_reset_ms` is the earliest instant at which one more token will have
/// leaked — a client-facing retry hint, not a scheduling guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketDecision {
    pub allowed: bool,
    pub next_reset_ms: i64,
}

/// A single leaky bucket tier.
///
/// `tokens` fills by one per admitted request and drains over time at
/// `leak_rate` tokens per `time_unit`. The admission predicate is post-decay
/// `tokens < capacity`.
#[derive(Debug)]
pub struct LeakyBucket {
    capacity: u32,
    leak_rate: f64,
    time_unit_ms: i64,
    tokens: u32,
    last_leak_ms: i64,
}

impl LeakyBucket {
    pub fn new(capacity: u32, leak_rate: f64, time_unit: Duration) -> Self {
        Self::new_at(capacity, leak_rate, time_unit, now_epoch_ms())
    }

    /// Construct with an explicit start time, for deterministic tests.
    pub fn new_at(capacity: u32, leak_rate: f64, time_unit: Duration, now_ms: i64) -> Self {
        Self {
            capacity,
            leak_rate,
            time_unit_ms: time_unit.as_millis() as i64,
            tokens: 0,
            last_leak_ms: now_ms,
        }
    }

    /// Drain whole tokens accumulated since the last decay computation.
    fn leak(&mut self, now_ms: i64) {
        let elapsed_units = (now_ms - self.last_leak_ms).max(0) as f64 / self.time_unit_ms as f64;
        let leaked = (elapsed_units * self.leak_rate).floor();
        self.tokens = self
            .tokens
            .saturating_sub(leaked.min(u32::MAX as f64) as u32);
        self.last_leak_ms = now_ms;
    }

    /// Evaluate admission at wall-clock now.
    pub fn try_consume(&mut self) -> BucketDecision {
        self.try_consume_at(now_epoch_ms())
    }

    /// Evaluate admission at an explicit instant. Decay always runs, even on
    /// rejection — the bucket never freezes.
    pub fn try_consume_at(&mut self, now_ms: i64) -> BucketDecision {
        self.leak(now_ms);

        let next_reset_ms = now_ms + (self.time_unit_ms as f64 / self.leak_rate) as i64;

        if self.tokens < self.capacity {
            self.tokens += 1;
            BucketDecision {
                allowed: true,
                next_reset_ms,
            }
        } else {
            BucketDecision {
                allowed: false,
                next_reset_ms,
            }
        }
    }

    pub fn tokens(&self) -> u32 {
        self.tokens
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

/// The minute and second tiers gating one connection's admissions.
#[derive(Debug)]
pub struct DualLeakyBucket {
    minute: LeakyBucket,
    second: LeakyBucket,
}

impl DualLeakyBucket {
    pub fn new(settings: &RateLimitSettings) -> Self {
        Self::new_at(settings, now_epoch_ms())
    }

    pub fn new_at(settings: &RateLimitSettings, now_ms: i64) -> Self {
        Self {
            minute: LeakyBucket::new_at(
                settings.minute_capacity,
                settings.minute_leak_rate,
                Duration::from_secs(60),
                now_ms,
            ),
            second: LeakyBucket::new_at(
                settings.second_capacity,
                settings.second_leak_rate,
                Duration::from_secs(1),
                now_ms,
            ),
        }
    }

    pub fn try_consume(&mut self) -> BucketDecision {
        self.try_consume_at(now_epoch_ms())
    }

    /// Evaluate both tiers independently: each performs its own decay and,
    /// when it individually admits, its own increment, regardless of the
    /// other tier's outcome. The overall request is admitted only when both
    /// tiers admit; on rejection the reported reset time is the max across
    /// the tiers that rejected (the longer wait dominates).
    pub fn try_consume_at(&mut self, now_ms: i64) -> BucketDecision {
        let minute = self.minute.try_consume_at(now_ms);
        let second = self.second.try_consume_at(now_ms);

        if minute.allowed && second.allowed {
            return BucketDecision {
                allowed: true,
                next_reset_ms: minute.next_reset_ms.max(second.next_reset_ms),
            };
        }

        let next_reset_ms = [minute, second]
            .iter()
            .filter(|d| !d.allowed)
            .map(|d| d.next_reset_ms)
            .max()
            .unwrap_or(now_ms);

        BucketDecision {
            allowed: false,
            next_reset_ms,
        }
    }

    pub fn minute_tokens(&self) -> u32 {
        self.minute.tokens()
    }

    pub fn second_tokens(&self) -> u32 {
        self.second.tokens()
    }
}
