//! Rotunda Core Resilience: Pure-logic fault tolerance primitives
//!
//! # Overview
//!
//! This crate provides the building blocks Rotunda composes into a resilient
//! upstream-API layer. It includes:
//!
//! - **Circuit Breaker**: Prevents cascading failures by failing fast when a service is unhealthy
//! - **TTL Cache**: Time-bounded response cache with LRU-by-last-access eviction
//! - **Sliding-Window Rate Limiter**: Caps admissions over a rolling time window
//! - **Backoff**: Fixed, linear, and exponential retry delay schedules with jitter
//! - **Dead-Letter Queue**: Bounded quarantine for permanently failed requests
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - Network protocols (HTTP, status codes, request shapes)
//! - Serialization formats
//! - Application-specific concerns
//!
//! It provides generic, composable fault-tolerance patterns that can be used across any layer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Your Application                │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       TTL Cache                         │  ← Serve reads without traffic
//! │  (Per-entry TTL, LRU eviction)          │
//! └─────────────┬───────────────────────────┘
//!               │ miss
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Sliding-Window Rate Limiter       │  ← Respect upstream quotas
//! │  (Timestamp window, prune + admit)      │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Circuit Breaker                   │  ← Fail-fast protection
//! │  (Windowed failures, single probe)      │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//!         External Service
//!               │
//!          On failure:
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Backoff Schedule                  │  ← Spaced, jittered retries
//! │  (fixed / linear / exponential)         │
//! └─────────────┬───────────────────────────┘
//!               │ exhausted?
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Dead-Letter Queue                 │  ← Permanent failure quarantine
//! │  (Bounded ring, drain for inspection)   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage Example
//!
//! ## Basic Circuit Breaker
//!
//! ```no_run
//! use rotunda_core_resilience::{CircuitBreaker, CircuitBreakerConfig, ResilienceError};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), ResilienceError> {
//! let config = CircuitBreakerConfig {
//!     failure_threshold: 5,
//!     recovery_timeout: Duration::from_secs(30),
//!     ..Default::default()
//! };
//!
//! let breaker = CircuitBreaker::new(config);
//!
//! let result = breaker.call(|| async {
//!     // Your potentially failing operation
//!     Ok::<_, ResilienceError>(42)
//! }).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Cache plus rate limiter
//!
//! ```no_run
//! use rotunda_core_resilience::{SlidingWindowLimiter, cache::TtlCache};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let cache: TtlCache<String, String> = TtlCache::new(500, Duration::from_secs(300));
//! let limiter = SlidingWindowLimiter::new(30, Duration::from_secs(60));
//!
//! let key = "congress:/bills/recent".to_string();
//! if cache.get(&key).await.is_none() && limiter.try_admit().await {
//!     // place the real call, then cache.set(key, response).await
//! }
//! # }
//! ```

pub mod cache;
pub mod circuit_breaker;
pub mod dead_letter;
pub mod error;
pub mod rate_limiter;
pub mod retry;

// Re-export main types for convenience
pub use cache::{CacheStats, TtlCache};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitStats};
pub use dead_letter::{DeadLetterEntry, DeadLetterQueue, DeadLetterStats, FailureReason};
pub use error::ResilienceError;
pub use rate_limiter::SlidingWindowLimiter;
pub use retry::{Backoff, BackoffStrategy};

#[cfg(feature = "governor-impl")]
pub use rate_limiter::governor_impl::TokenBucketLimiter;

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use rotunda_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::cache::{CacheStats, TtlCache};
    pub use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
    pub use super::dead_letter::{DeadLetterEntry, DeadLetterQueue, FailureReason};
    pub use super::error::ResilienceError;
    pub use super::rate_limiter::SlidingWindowLimiter;
    pub use super::retry::{Backoff, BackoffStrategy};
}
