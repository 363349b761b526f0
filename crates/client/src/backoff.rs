//! Exponential backoff with jitter for reconnect scheduling.
//!
//! The delay for attempt `n` is `min(base * 2^(n-1) + jitter, cap)` where
//! the jitter is drawn uniformly from `[0, policy.jitter)`. The random
//! component keeps a fleet of dashboards from reconnecting in lockstep after
//! a backend restart.

use rand::Rng as _;
use std::time::Duration;

/// Tunable reconnect policy.
///
/// The defaults are the production constants; tests compress them to keep
/// wall-clock time down.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry, doubled on each subsequent attempt.
    pub base: Duration,
    /// Upper bound on any single delay, applied after jitter.
    pub cap: Duration,
    /// Attempts before the channel gives up permanently.
    pub max_attempts: u32,
    /// Exclusive upper bound of the random component added to each delay.
    pub jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            cap: Duration::from_millis(30_000),
            max_attempts: 5,
            jitter: Duration::from_millis(1000),
        }
    }
}

/// Attempt counter and delay computation for one channel.
#[derive(Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Attempts consumed since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Clears the attempt counter. Called on every successful open.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Consumes one attempt and returns the delay before it, or `None` once
    /// the attempt ceiling is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_attempts {
            return None;
        }
        self.attempt += 1;

        let factor = 1u32
            .checked_shl(self.attempt - 1)
            .unwrap_or(u32::MAX);
        let exponential = self.policy.base.saturating_mul(factor);

        let jitter_ms = self.policy.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
        };

        Some(exponential.saturating_add(jitter).min(self.policy.cap))
    }
}
