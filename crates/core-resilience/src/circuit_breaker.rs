//! Circuit breaker for fault tolerance
//!
//! The circuit breaker prevents cascading failures by failing fast when a
//! service is misbehaving. Three states:
//! - Closed: normal operation, calls pass through
//! - Open: calls are rejected immediately, no upstream traffic
//! - HalfOpen: one trial call probes whether the service recovered
//!
//! Failures are counted within a rolling monitoring window, and the circuit
//! only opens once a minimum number of calls has been observed in that
//! window, so a single early failure on a quiet service cannot trip it.

use super::error::ResilienceError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// State of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through normally
    Closed,
    /// Calls fail immediately until the embedded deadline passes
    Open { until: Instant },
    /// A single trial call is permitted to test recovery
    HalfOpen,
}

impl CircuitState {
    /// Short label for logs and stat dashboards
    pub fn label(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures within the monitoring window needed to open the circuit
    pub failure_threshold: usize,
    /// How long the circuit stays open before permitting a trial call
    pub recovery_timeout: Duration,
    /// Length of the rolling window over which failures are counted
    pub monitoring_period: Duration,
    /// Minimum calls observed in the window before the circuit may open
    pub minimum_requests: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            monitoring_period: Duration::from_secs(60),
            minimum_requests: 10,
        }
    }
}

/// Mutable state guarded by the breaker's mutex
#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    window_started_at: Instant,
    failures_in_window: usize,
    requests_in_window: usize,
    probe_in_flight: bool,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            window_started_at: Instant::now(),
            failures_in_window: 0,
            requests_in_window: 0,
            probe_in_flight: false,
        }
    }

    /// Restart the monitoring window once it has aged out
    fn roll_window(&mut self, period: Duration, now: Instant) {
        if now.duration_since(self.window_started_at) > period {
            self.window_started_at = now;
            self.failures_in_window = 0;
            self.requests_in_window = 0;
        }
    }
}

/// Snapshot of breaker state for observability
#[derive(Debug, Clone, Copy)]
pub struct CircuitStats {
    /// Current state
    pub state: CircuitState,
    /// Failures recorded in the current monitoring window
    pub failures_in_window: usize,
    /// Calls recorded in the current monitoring window
    pub requests_in_window: usize,
    /// Remaining time before an open circuit permits a trial call
    pub time_until_probe: Option<Duration>,
}

/// Per-service circuit breaker
///
/// The breaker exposes two styles of use. `call` wraps an operation whose
/// error type is [`ResilienceError`]. Callers with richer error types use
/// the primitives directly: [`acquire`](Self::acquire) before the call,
/// then [`record_success`](Self::record_success),
/// [`record_failure`](Self::record_failure), or
/// [`record_inconclusive`](Self::record_inconclusive) after it settles.
///
/// # Example
/// ```
/// use rotunda_core_resilience::{CircuitBreaker, CircuitBreakerConfig, ResilienceError};
///
/// # async fn example() -> Result<(), ResilienceError> {
/// let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
///
/// let answer = breaker
///     .call(|| async { Ok::<_, ResilienceError>(42) })
///     .await?;
/// assert_eq!(answer, 42);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    state: Arc<Mutex<BreakerState>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(BreakerState::new())),
        }
    }

    /// Create a new circuit breaker with default configuration
    pub fn new_default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    /// Ask permission to place a call
    ///
    /// Performs the Open → HalfOpen transition when the recovery timeout
    /// has elapsed; the caller granted that transition is the trial call.
    /// Rejected callers get [`ResilienceError::CircuitOpen`] (or
    /// [`ResilienceError::ProbeInFlight`] while the trial is pending)
    /// without any upstream traffic.
    pub async fn acquire(&self) -> Result<(), ResilienceError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.roll_window(self.config.monitoring_period, now);

        match state.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open { until } => {
                if now >= until {
                    state.state = CircuitState::HalfOpen;
                    state.probe_in_flight = true;
                    info!("circuit half-open, admitting trial call");
                    Ok(())
                } else {
                    Err(ResilienceError::CircuitOpen)
                }
            }
            CircuitState::HalfOpen => {
                if state.probe_in_flight {
                    Err(ResilienceError::ProbeInFlight)
                } else {
                    state.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Non-mutating readiness peek for dispatch scheduling
    ///
    /// True when an `acquire` issued now would be granted.
    pub async fn is_ready(&self) -> bool {
        let now = Instant::now();
        let state = self.state.lock().await;
        match state.state {
            CircuitState::Closed => true,
            CircuitState::Open { until } => now >= until,
            CircuitState::HalfOpen => !state.probe_in_flight,
        }
    }

    /// Record a successful call
    pub async fn record_success(&self) {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.roll_window(self.config.monitoring_period, now);
        state.requests_in_window += 1;

        match state.state {
            CircuitState::Closed => {}
            CircuitState::HalfOpen => {
                // One trial success closes the circuit and wipes the slate
                state.state = CircuitState::Closed;
                state.probe_in_flight = false;
                state.failures_in_window = 0;
                state.requests_in_window = 0;
                state.window_started_at = now;
                info!("trial call succeeded, circuit closed");
            }
            CircuitState::Open { .. } => {
                // A call admitted before the circuit opened settled late.
                // Recovery stays purely time-based.
            }
        }
    }

    /// Record a failed call
    pub async fn record_failure(&self) {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.roll_window(self.config.monitoring_period, now);
        state.requests_in_window += 1;

        match state.state {
            CircuitState::Closed => {
                state.failures_in_window += 1;
                if state.failures_in_window >= self.config.failure_threshold
                    && state.requests_in_window >= self.config.minimum_requests
                {
                    state.state = CircuitState::Open {
                        until: now + self.config.recovery_timeout,
                    };
                    warn!(
                        failures = state.failures_in_window,
                        requests = state.requests_in_window,
                        recovery_timeout_ms = self.config.recovery_timeout.as_millis() as u64,
                        "failure threshold reached, circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                state.state = CircuitState::Open {
                    until: now + self.config.recovery_timeout,
                };
                state.probe_in_flight = false;
                warn!("trial call failed, circuit reopened");
            }
            CircuitState::Open { .. } => {}
        }
    }

    /// Record a call that settled without saying anything about service
    /// health
    ///
    /// Counts toward the window's observations without registering a
    /// failure. A half-open trial resolved this way reopens the circuit:
    /// an inconclusive probe is not evidence of recovery.
    pub async fn record_inconclusive(&self) {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.roll_window(self.config.monitoring_period, now);
        state.requests_in_window += 1;

        if matches!(state.state, CircuitState::HalfOpen) {
            state.state = CircuitState::Open {
                until: now + self.config.recovery_timeout,
            };
            state.probe_in_flight = false;
            warn!("trial call inconclusive, circuit reopened");
        }
    }

    /// Execute an operation under breaker protection
    ///
    /// No retry happens here; retry is a concern layered above the breaker.
    pub async fn call<F, Fut, T>(&self, op: F) -> Result<T, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, ResilienceError>>,
    {
        self.acquire().await?;

        match op().await {
            Ok(result) => {
                self.record_success().await;
                Ok(result)
            }
            Err(e) => {
                if e.should_trip_breaker() {
                    self.record_failure().await;
                } else {
                    self.record_inconclusive().await;
                }
                Err(e)
            }
        }
    }

    /// Current state
    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.state
    }

    /// Failures recorded in the current monitoring window
    pub async fn failures_in_window(&self) -> usize {
        self.state.lock().await.failures_in_window
    }

    /// Snapshot for observability
    pub async fn stats(&self) -> CircuitStats {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.roll_window(self.config.monitoring_period, now);

        let time_until_probe = match state.state {
            CircuitState::Open { until } if until > now => Some(until - now),
            _ => None,
        };
        CircuitStats {
            state: state.state,
            failures_in_window: state.failures_in_window,
            requests_in_window: state.requests_in_window,
            time_until_probe,
        }
    }

    /// Force the breaker back to closed with clean counters
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        *state = BreakerState::new();
    }
}
