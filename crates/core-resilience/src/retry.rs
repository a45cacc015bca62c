//! Backoff delay computation for retry loops
//!
//! Pure math: given an attempt index and a strategy, produce the delay to
//! sleep before the next attempt. The retry loop itself lives with the
//! caller, which also decides whether an error deserves a retry at all.

use rand::Rng;
use std::time::Duration;

/// How the delay grows across attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffStrategy {
    /// Same delay every attempt
    Fixed,
    /// Delay grows by the base amount each attempt
    Linear,
    /// Delay doubles each attempt
    #[default]
    Exponential,
}

/// Delay schedule for a retry loop
///
/// `delay_for` is deterministic and test-friendly; `jittered_delay` adds a
/// random fraction on top so concurrent callers spread out instead of
/// retrying in lockstep.
///
/// # Example
/// ```
/// use rotunda_core_resilience::retry::{Backoff, BackoffStrategy};
/// use std::time::Duration;
///
/// let backoff = Backoff {
///     strategy: BackoffStrategy::Exponential,
///     base_delay: Duration::from_millis(100),
///     max_delay: Duration::from_secs(10),
///     jitter: 0.0,
/// };
///
/// assert_eq!(backoff.delay_for(0), Duration::from_millis(100));
/// assert_eq!(backoff.delay_for(1), Duration::from_millis(200));
/// assert_eq!(backoff.delay_for(2), Duration::from_millis(400));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    /// Growth strategy
    pub strategy: BackoffStrategy,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Ceiling no computed delay exceeds
    pub max_delay: Duration,
    /// Random extra as a fraction of the computed delay (0.0 disables)
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: 0.1,
        }
    }
}

impl Backoff {
    /// Jitter-free schedule, mostly for tests and deterministic callers
    pub fn without_jitter(strategy: BackoffStrategy, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            strategy,
            base_delay,
            max_delay,
            jitter: 0.0,
        }
    }

    /// Deterministic delay before the retry following `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Linear => base_ms.saturating_mul(attempt as u64 + 1),
            BackoffStrategy::Exponential => base_ms.saturating_mul(2u64.saturating_pow(attempt)),
        };
        Duration::from_millis(delay_ms).min(self.max_delay)
    }

    /// `delay_for` plus up to `jitter` of itself, randomly
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        if self.jitter <= 0.0 {
            return delay;
        }
        let spread = delay.as_secs_f64() * self.jitter;
        let extra = rand::rng().random_range(0.0..=spread);
        delay + Duration::from_secs_f64(extra)
    }
}
