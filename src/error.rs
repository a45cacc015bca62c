/*!
 * Error types for Rotunda
 */

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors produced while fetching from an upstream service.
///
/// Every variant that originates from a request carries the service and
/// endpoint it was for, so log lines and dead-letter entries stay
/// self-describing.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Connection-level failure: DNS, refused, reset, TLS.
    #[error("network error calling {service} {endpoint}: {message}")]
    Network {
        service: String,
        endpoint: String,
        message: String,
    },

    /// The request exceeded the service's configured timeout.
    #[error("request to {service} {endpoint} timed out after {elapsed:?}")]
    Timeout {
        service: String,
        endpoint: String,
        elapsed: Duration,
    },

    /// Upstream answered with a 4xx status other than 429.
    #[error("{service} {endpoint} rejected the request with status {status}")]
    UpstreamClient {
        service: String,
        endpoint: String,
        status: u16,
    },

    /// Upstream answered with a 5xx status.
    #[error("{service} {endpoint} failed with status {status}")]
    UpstreamServer {
        service: String,
        endpoint: String,
        status: u16,
    },

    /// Upstream answered 429 Too Many Requests.
    #[error("{service} {endpoint} rate limited the request")]
    RateLimited {
        service: String,
        endpoint: String,
        retry_after: Option<Duration>,
    },

    /// The circuit breaker for this service is open; no request was sent.
    #[error("circuit breaker for {service} is open")]
    CircuitOpen { service: String },

    /// At least one fallback accepted the failure and none produced a response.
    #[error("all fallbacks exhausted for {service} {endpoint} after {attempts} attempts (tried: {})", strategies_tried.join(", "))]
    FallbackExhausted {
        service: String,
        endpoint: String,
        attempts: usize,
        strategies_tried: Vec<String>,
        #[source]
        source: Box<ApiError>,
    },

    /// The orchestrator is draining and no longer accepts work.
    #[error("orchestrator is shutting down")]
    ShuttingDown,

    /// The request named a service with no configuration entry.
    #[error("unknown service: {service}")]
    UnknownService { service: String },

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ApiError {
    /// Get the error category for retry decisions, logging, and stats.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ApiError::Network { .. } => ErrorCategory::Network,
            ApiError::Timeout { .. } => ErrorCategory::Timeout,
            ApiError::UpstreamClient { .. } => ErrorCategory::Client,
            ApiError::UpstreamServer { .. } => ErrorCategory::Server,
            ApiError::RateLimited { .. } => ErrorCategory::RateLimit,
            ApiError::CircuitOpen { .. }
            | ApiError::FallbackExhausted { .. }
            | ApiError::ShuttingDown
            | ApiError::UnknownService { .. }
            | ApiError::InvalidConfig(_) => ErrorCategory::Internal,
        }
    }

    /// HTTP status associated with this error, if the upstream answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::UpstreamClient { status, .. } | ApiError::UpstreamServer { status, .. } => {
                Some(*status)
            }
            ApiError::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    /// Whether this failure should count against the service's circuit breaker.
    ///
    /// Client errors (4xx other than 429) mean the request itself was bad, not
    /// that the service is unhealthy. Locally-generated errors never trip.
    pub fn should_trip_breaker(&self) -> bool {
        match self {
            ApiError::Network { .. }
            | ApiError::Timeout { .. }
            | ApiError::UpstreamServer { .. }
            | ApiError::RateLimited { .. } => true,
            ApiError::UpstreamClient { .. }
            | ApiError::CircuitOpen { .. }
            | ApiError::FallbackExhausted { .. }
            | ApiError::ShuttingDown
            | ApiError::UnknownService { .. }
            | ApiError::InvalidConfig(_) => false,
        }
    }

    /// The service this error is about, when it carries one.
    pub fn service(&self) -> Option<&str> {
        match self {
            ApiError::Network { service, .. }
            | ApiError::Timeout { service, .. }
            | ApiError::UpstreamClient { service, .. }
            | ApiError::UpstreamServer { service, .. }
            | ApiError::RateLimited { service, .. }
            | ApiError::CircuitOpen { service }
            | ApiError::FallbackExhausted { service, .. }
            | ApiError::UnknownService { service } => Some(service),
            ApiError::ShuttingDown | ApiError::InvalidConfig(_) => None,
        }
    }
}

/// Error category for retry configuration, classification, and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Connection-level failures
    Network,
    /// Request deadline exceeded
    Timeout,
    /// Upstream 4xx responses other than 429
    Client,
    /// Upstream 5xx responses
    Server,
    /// Upstream 429 responses
    RateLimit,
    /// Errors generated inside the orchestration layer
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::Client => write!(f, "client"),
            ErrorCategory::Server => write!(f, "server"),
            ErrorCategory::RateLimit => write!(f, "ratelimit"),
            ErrorCategory::Internal => write!(f, "internal"),
        }
    }
}
