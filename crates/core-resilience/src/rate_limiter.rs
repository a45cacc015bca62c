//! Sliding-window rate limiting
//!
//! Admission control over a rolling time window: a deque of admission
//! timestamps is pruned to `now - window` on every check, and a new call is
//! admitted only while the pruned count is under budget. Refusal is
//! non-destructive; the caller decides whether to requeue or give up.
//!
//! When the upstream rejects a call for quota reasons despite local budget
//! being available, `penalize` imposes a cooldown deadline that refuses all
//! admissions until it passes.
//!
//! An alternative token-bucket implementation backed by the `governor`
//! crate is available behind the `governor-impl` feature.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Default)]
struct WindowState {
    timestamps: VecDeque<Instant>,
    cooldown_until: Option<Instant>,
}

/// Sliding-window request limiter
///
/// Cheap to clone; clones share the same window.
///
/// # Example
/// ```
/// use rotunda_core_resilience::SlidingWindowLimiter;
/// use std::time::Duration;
///
/// # async fn example() {
/// // 30 requests per rolling minute
/// let limiter = SlidingWindowLimiter::new(30, Duration::from_secs(60));
///
/// if limiter.try_admit().await {
///     // budget held, place the call
/// }
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SlidingWindowLimiter {
    max_requests: usize,
    window: Duration,
    state: Arc<Mutex<WindowState>>,
}

impl SlidingWindowLimiter {
    /// Create a limiter admitting `max_requests` per rolling `window`
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            state: Arc::new(Mutex::new(WindowState::default())),
        }
    }

    /// Try to take one slot of budget
    ///
    /// Returns false without consuming anything when the window is full or
    /// a penalty cooldown is active. A `max_requests` of zero refuses
    /// everything.
    pub async fn try_admit(&self) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        if let Some(until) = state.cooldown_until {
            if now < until {
                debug!("penalty cooldown active, admission refused");
                return false;
            }
            state.cooldown_until = None;
        }

        Self::prune(&mut state.timestamps, now, self.window);
        if state.timestamps.len() < self.max_requests {
            state.timestamps.push_back(now);
            true
        } else {
            debug!(
                in_window = state.timestamps.len(),
                budget = self.max_requests,
                "rate window full, admission refused"
            );
            false
        }
    }

    /// Refuse all admissions until `hint` elapses, or one full window when
    /// the upstream gave no guidance
    ///
    /// Called when the upstream answers 429 even though the local window
    /// had budget: its quota view is stricter than ours, so stop sending.
    /// An already-running longer cooldown is never shortened.
    pub async fn penalize(&self, hint: Option<Duration>) {
        let penalty = hint.unwrap_or(self.window);
        let until = Instant::now() + penalty;
        let mut state = self.state.lock().await;
        state.cooldown_until = Some(match state.cooldown_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
        debug!(
            penalty_ms = penalty.as_millis() as u64,
            "upstream quota refusal, window cooling down"
        );
    }

    /// Whether a penalty cooldown is currently refusing admissions
    pub async fn cooling_down(&self) -> bool {
        let now = Instant::now();
        let state = self.state.lock().await;
        matches!(state.cooldown_until, Some(until) if now < until)
    }

    /// Admissions currently counted in the window
    pub async fn in_window(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        Self::prune(&mut state.timestamps, now, self.window);
        state.timestamps.len()
    }

    /// Slots still available in the current window
    pub async fn remaining(&self) -> usize {
        self.max_requests.saturating_sub(self.in_window().await)
    }

    /// Fraction of the budget consumed, 0.0 to 1.0
    ///
    /// A saturated 1.0 is reported while a penalty cooldown holds, since
    /// the window refuses admissions no matter what it counts.
    pub async fn utilization(&self) -> f64 {
        if self.max_requests == 0 {
            return 0.0;
        }
        let now = Instant::now();
        let mut state = self.state.lock().await;
        if matches!(state.cooldown_until, Some(until) if now < until) {
            return 1.0;
        }
        Self::prune(&mut state.timestamps, now, self.window);
        state.timestamps.len() as f64 / self.max_requests as f64
    }

    /// Budget per window
    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Window length
    pub fn window(&self) -> Duration {
        self.window
    }

    fn prune(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(&front) = timestamps.front() {
            if now.duration_since(front) >= window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Token-bucket rate limiting via the governor crate
///
/// Heavier machinery than the sliding window, useful when burst smoothing
/// matters more than an exact rolling count.
#[cfg(feature = "governor-impl")]
pub mod governor_impl {
    use super::*;
    use crate::error::ResilienceError;
    use governor::{
        clock::DefaultClock,
        state::{InMemoryState, NotKeyed},
        Quota, RateLimiter,
    };
    use std::num::NonZeroU32;

    /// Token-bucket limiter with the same admission surface as the
    /// sliding window
    pub struct TokenBucketLimiter {
        limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    }

    impl TokenBucketLimiter {
        /// Create a bucket refilling `max_requests` per `period`
        pub fn new(max_requests: u32, period: Duration) -> Result<Self, ResilienceError> {
            let max_requests = NonZeroU32::new(max_requests).ok_or_else(|| {
                ResilienceError::Permanent("max_requests must be > 0".to_string())
            })?;

            let quota = Quota::with_period(period)
                .ok_or_else(|| ResilienceError::Permanent("invalid period".to_string()))?
                .allow_burst(max_requests);

            Ok(Self {
                limiter: Arc::new(RateLimiter::direct(quota)),
            })
        }

        /// Wait until a token is available
        pub async fn until_ready(&self) {
            self.limiter.until_ready().await;
        }

        /// Take a token if one is available right now
        pub fn try_admit(&self) -> bool {
            self.limiter.check().is_ok()
        }
    }
}
