/*!
 * Configuration types for Rotunda
 */

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ErrorCategory};
use rotunda_core_resilience::circuit_breaker::CircuitBreakerConfig;
use rotunda_core_resilience::retry::{Backoff, BackoffStrategy};

/// Backoff growth curve between retry attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Same delay before every attempt
    Fixed,

    /// Delay grows by the base amount each attempt
    Linear,

    /// Delay doubles each attempt, capped at max_delay_ms
    #[default]
    Exponential,
}

impl From<BackoffKind> for BackoffStrategy {
    fn from(kind: BackoffKind) -> Self {
        match kind {
            BackoffKind::Fixed => BackoffStrategy::Fixed,
            BackoffKind::Linear => BackoffStrategy::Linear,
            BackoffKind::Exponential => BackoffStrategy::Exponential,
        }
    }
}

/// Retry behavior for a single service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first (1 = no retries)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on any computed delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Growth curve for successive delays
    #[serde(default)]
    pub backoff: BackoffKind,

    /// Random jitter as a fraction of the computed delay (0.0 - 1.0)
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// Error categories worth retrying
    #[serde(default = "default_retryable_errors")]
    pub retryable_errors: Vec<ErrorCategory>,

    /// HTTP statuses a retryable category is still allowed to retry
    #[serde(default = "default_retryable_status_codes")]
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff: BackoffKind::Exponential,
            jitter: default_jitter(),
            retryable_errors: default_retryable_errors(),
            retryable_status_codes: default_retryable_status_codes(),
        }
    }
}

impl RetryPolicy {
    /// Decide whether a failed attempt should be retried.
    ///
    /// An error qualifies when its category is listed as retryable and, if it
    /// carries an HTTP status, that status is also listed. Statuses outside
    /// the list (a 501, say) are treated as permanent even for retryable
    /// categories, and client errors other than 429 fail the category gate
    /// outright.
    pub fn is_retryable(&self, error: &ApiError) -> bool {
        if !self.retryable_errors.contains(&error.category()) {
            return false;
        }
        match error.status() {
            Some(status) => self.retryable_status_codes.contains(&status),
            None => true,
        }
    }

    /// Build the delay schedule this policy describes.
    pub fn backoff(&self) -> Backoff {
        Backoff {
            strategy: self.backoff.into(),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
        }
    }

    /// Preset for flaky-but-fast upstreams: more attempts, shorter delays.
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
            jitter: 0.25,
            ..Default::default()
        }
    }

    /// Preset for quota-sensitive upstreams: fewer attempts, longer delays.
    pub fn conservative() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
            ..Default::default()
        }
    }
}

/// Circuit breaker thresholds for a single service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    /// Failures within the monitoring window needed to open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,

    /// How long the circuit stays open before permitting a trial call
    #[serde(default = "default_recovery_timeout_ms")]
    pub recovery_timeout_ms: u64,

    /// Length of the rolling window over which failures are counted
    #[serde(default = "default_monitoring_period_ms")]
    pub monitoring_period_ms: u64,

    /// Minimum calls observed in the window before the circuit may open
    #[serde(default = "default_minimum_requests")]
    pub minimum_requests: usize,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
            monitoring_period_ms: default_monitoring_period_ms(),
            minimum_requests: default_minimum_requests(),
        }
    }
}

impl CircuitBreakerSettings {
    pub fn to_core(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: Duration::from_millis(self.recovery_timeout_ms),
            monitoring_period: Duration::from_millis(self.monitoring_period_ms),
            minimum_requests: self.minimum_requests,
        }
    }
}

/// Response cache behavior for a single service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Whether idempotent reads may be served from cache
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How long a cached response stays fresh
    #[serde(default = "default_cache_ttl_ms")]
    pub ttl_ms: u64,

    /// Entry budget before LRU eviction (0 = unbounded)
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: default_cache_ttl_ms(),
            max_size: default_cache_max_size(),
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// Outbound rate limit for a single service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Requests admitted per window
    #[serde(default = "default_rate_limit_requests")]
    pub requests: usize,

    /// Window length
    #[serde(default = "default_rate_limit_window_ms")]
    pub window_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests: default_rate_limit_requests(),
            window_ms: default_rate_limit_window_ms(),
        }
    }
}

impl RateLimitSettings {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Periodic liveness probe for a single service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckSettings {
    /// Endpoint to probe, relative to the service base URL
    #[serde(default = "default_health_endpoint")]
    pub endpoint: String,

    /// How often to probe
    #[serde(default = "default_health_interval_ms")]
    pub interval_ms: u64,
}

impl Default for HealthCheckSettings {
    fn default() -> Self {
        Self {
            endpoint: default_health_endpoint(),
            interval_ms: default_health_interval_ms(),
        }
    }
}

impl HealthCheckSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Everything the orchestrator needs to know about one upstream service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Unique name requests refer to ("congress", "openstates", ...)
    pub name: String,

    /// Base URL all endpoints are resolved against
    pub base_url: String,

    /// Per-request deadline
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// In-flight request ceiling for this service
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    /// Optional periodic health probe
    #[serde(default)]
    pub health: Option<HealthCheckSettings>,
}

impl ServiceConfig {
    /// Minimal config for a service: defaults everywhere but name and URL.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            timeout_ms: default_timeout_ms(),
            max_concurrency: default_max_concurrency(),
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            cache: CacheSettings::default(),
            rate_limit: RateLimitSettings::default(),
            health: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Top-level configuration: the service roster plus dispatch tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// One entry per upstream service
    #[serde(default)]
    pub services: Vec<ServiceConfig>,

    /// Ready requests dispatched per scheduling pass
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How long the dispatcher dozes when nothing is ready
    #[serde(default = "default_idle_sleep_ms")]
    pub idle_sleep_ms: u64,

    /// Times the orchestrator will re-queue a retryable failure before
    /// giving up (on top of the client's own in-attempt retries)
    #[serde(default = "default_max_requeues")]
    pub max_requeues: u32,

    /// Entry budget for the dead-letter queue
    #[serde(default = "default_dead_letter_capacity")]
    pub dead_letter_capacity: usize,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            services: Vec::new(),
            batch_size: default_batch_size(),
            idle_sleep_ms: default_idle_sleep_ms(),
            max_requeues: default_max_requeues(),
            dead_letter_capacity: default_dead_letter_capacity(),
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: OrchestratorConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Look up a service entry by name
    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    /// Check the configuration for values that cannot work at runtime.
    pub fn validate(&self) -> Result<(), String> {
        if self.services.is_empty() {
            return Err("no services configured".to_string());
        }
        if self.batch_size == 0 {
            return Err("batch_size must be at least 1".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for service in &self.services {
            if service.name.is_empty() {
                return Err("service name cannot be empty".to_string());
            }
            if !seen.insert(service.name.as_str()) {
                return Err(format!("duplicate service name: {}", service.name));
            }
            if !service.base_url.starts_with("http://") && !service.base_url.starts_with("https://")
            {
                return Err(format!(
                    "service {}: base_url must start with http:// or https://",
                    service.name
                ));
            }
            if service.timeout_ms == 0 {
                return Err(format!("service {}: timeout_ms must be > 0", service.name));
            }
            if service.max_concurrency == 0 {
                return Err(format!(
                    "service {}: max_concurrency must be at least 1",
                    service.name
                ));
            }
            if service.retry.max_attempts == 0 {
                return Err(format!(
                    "service {}: retry.max_attempts must be at least 1",
                    service.name
                ));
            }
            if !(0.0..=1.0).contains(&service.retry.jitter) {
                return Err(format!(
                    "service {}: retry.jitter must be between 0.0 and 1.0",
                    service.name
                ));
            }
            if service.circuit_breaker.failure_threshold == 0 {
                return Err(format!(
                    "service {}: circuit_breaker.failure_threshold must be at least 1",
                    service.name
                ));
            }
            if service.rate_limit.requests > 0 && service.rate_limit.window_ms == 0 {
                return Err(format!(
                    "service {}: rate_limit.window_ms must be > 0",
                    service.name
                ));
            }
            if service.cache.enabled && service.cache.ttl_ms == 0 {
                return Err(format!(
                    "service {}: cache.ttl_ms must be > 0 when the cache is enabled",
                    service.name
                ));
            }
            if let Some(health) = &service.health {
                if health.interval_ms == 0 {
                    return Err(format!(
                        "service {}: health.interval_ms must be > 0",
                        service.name
                    ));
                }
            }
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter() -> f64 {
    0.1
}

fn default_retryable_errors() -> Vec<ErrorCategory> {
    vec![
        ErrorCategory::Network,
        ErrorCategory::Timeout,
        ErrorCategory::RateLimit,
        ErrorCategory::Server,
    ]
}

fn default_retryable_status_codes() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}

fn default_failure_threshold() -> usize {
    5
}

fn default_recovery_timeout_ms() -> u64 {
    30_000
}

fn default_monitoring_period_ms() -> u64 {
    60_000
}

fn default_minimum_requests() -> usize {
    10
}

fn default_cache_ttl_ms() -> u64 {
    300_000 // 5 minutes
}

fn default_cache_max_size() -> usize {
    500
}

fn default_rate_limit_requests() -> usize {
    30
}

fn default_rate_limit_window_ms() -> u64 {
    60_000
}

fn default_health_endpoint() -> String {
    "/health".to_string()
}

fn default_health_interval_ms() -> u64 {
    30_000
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_concurrency() -> usize {
    4
}

fn default_batch_size() -> usize {
    10
}

fn default_idle_sleep_ms() -> u64 {
    25
}

fn default_max_requeues() -> u32 {
    2
}

fn default_dead_letter_capacity() -> usize {
    256
}
