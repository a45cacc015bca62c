//! Error types for the resilience primitives

use thiserror::Error;

/// Errors produced by the resilience primitives themselves
#[derive(Debug, Error, Clone)]
pub enum ResilienceError {
    /// Circuit breaker is open, rejecting calls without attempting them
    #[error("circuit breaker is open, rejecting calls")]
    CircuitOpen,

    /// Circuit breaker is half-open and its single trial call is in flight
    #[error("circuit breaker is half-open with a trial call in flight")]
    ProbeInFlight,

    /// Sliding-window rate limit exhausted
    #[error("rate limit exceeded, window is full")]
    RateLimitExceeded,

    /// Transient error that may be retried
    #[error("transient error: {0}")]
    Transient(String),

    /// Permanent error that should not be retried
    #[error("permanent error: {0}")]
    Permanent(String),

    /// Operation exceeded its deadline
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Retry budget exhausted
    #[error("maximum attempts ({0}) exhausted")]
    AttemptsExhausted(usize),
}

impl ResilienceError {
    /// Whether this error is transient and a retry may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ResilienceError::Transient(_)
                | ResilienceError::RateLimitExceeded
                | ResilienceError::Timeout(_)
        )
    }

    /// Whether this error is permanent and retrying is pointless
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ResilienceError::Permanent(_) | ResilienceError::CircuitOpen
        )
    }

    /// Whether this error should count toward opening the circuit
    ///
    /// Rejections issued by the breaker itself never feed back into its
    /// own failure count.
    pub fn should_trip_breaker(&self) -> bool {
        !matches!(
            self,
            ResilienceError::CircuitOpen
                | ResilienceError::ProbeInFlight
                | ResilienceError::RateLimitExceeded
        )
    }
}
