/*!
 * Rotunda - Resilient orchestration for external civic-data APIs
 *
 * A fault-tolerant client layer with:
 * - Per-service circuit breakers with single-call trial recovery
 * - Retry with exponential backoff and jitter
 * - TTL response caching for idempotent reads
 * - Sliding-window rate limiting
 * - Prioritized request queueing with backoff re-queue on failure
 * - Fallback chains for degraded responses
 * - Dead-letter capture for requests that never succeeded
 *
 * Version: 0.2.0
 */

pub mod client;
pub mod config;
pub mod error;
pub mod fallback;
pub mod logging;
pub mod orchestrator;
pub mod stats;
pub mod transport;

// Re-export commonly used types
pub use client::ResilientClient;
pub use config::{OrchestratorConfig, RetryPolicy, ServiceConfig};
pub use error::{ApiError, ErrorCategory, Result};
pub use fallback::{FallbackChain, FallbackOutcome, FallbackStrategy, StaticFallback};
pub use orchestrator::{OrchestratorBuilder, PendingResponse, RequestOrchestrator};
pub use stats::{OrchestratorStats, ServiceStats};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Method, ResponseSource, Transport};

// The underlying fault-tolerance primitives, usable on their own
pub use rotunda_core_resilience as resilience;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
