/*!
 * Per-service resilient client
 *
 * `ResilientClient` owns everything one upstream service needs: its cache,
 * its circuit breaker, its retry policy, and its fallback chain. A call
 * walks them in order; the response says which layer answered.
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::error::ApiError;
use crate::fallback::{FallbackChain, FallbackOutcome, FallbackStrategy};
use crate::transport::{ApiRequest, ApiResponse, ResponseSource, Transport};
use rotunda_core_resilience::cache::TtlCache;
use rotunda_core_resilience::circuit_breaker::{CircuitBreaker, CircuitState, CircuitStats};
use rotunda_core_resilience::CacheStats;

/// Resilient facade over a single upstream service
#[derive(Clone)]
pub struct ResilientClient {
    config: Arc<ServiceConfig>,
    transport: Arc<dyn Transport>,
    breaker: CircuitBreaker,
    cache: Option<TtlCache<String, Value>>,
    fallbacks: FallbackChain,
    healthy: Arc<AtomicBool>,
}

impl ResilientClient {
    pub fn new(config: ServiceConfig, transport: Arc<dyn Transport>) -> Self {
        let breaker = CircuitBreaker::new(config.circuit_breaker.to_core());
        let cache = config
            .cache
            .enabled
            .then(|| TtlCache::new(config.cache.max_size, config.cache.ttl()));
        Self {
            config: Arc::new(config),
            transport,
            breaker,
            cache,
            fallbacks: FallbackChain::new(),
            healthy: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn with_fallbacks(mut self, fallbacks: FallbackChain) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    pub fn add_fallback(&mut self, strategy: Arc<dyn FallbackStrategy>) {
        self.fallbacks.register(strategy);
    }

    pub fn service_name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Execute a request through every resilience layer.
    ///
    /// The pipeline: cache lookup for idempotent reads, then breaker-gated
    /// upstream attempts with backoff between retryable failures, then the
    /// fallback chain. Whatever layer answers stamps its provenance on the
    /// response.
    pub async fn call(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let started = Instant::now();

        if let Some(cached) = self.cache_lookup(request).await {
            debug!(
                service = %request.service,
                key = %request.cache_key(),
                "serving response from cache"
            );
            return Ok(ApiResponse {
                data: cached,
                status: 200,
                source: ResponseSource::Cache,
                from_cache: true,
                attempts: 0,
                latency: started.elapsed(),
            });
        }

        let max_attempts = self.config.retry.max_attempts.max(1);
        let backoff = self.config.retry.backoff();
        let mut attempts: u32 = 0;

        let error = loop {
            if self.breaker.acquire().await.is_err() {
                debug!(
                    service = %self.config.name,
                    "circuit open, failing fast without upstream call"
                );
                break ApiError::CircuitOpen {
                    service: self.config.name.clone(),
                };
            }
            attempts += 1;

            match self.transport.send(&self.config, request).await {
                Ok(raw) => {
                    self.breaker.record_success().await;
                    self.cache_store(request, &raw.body).await;
                    return Ok(ApiResponse {
                        data: raw.body,
                        status: raw.status,
                        source: ResponseSource::Api,
                        from_cache: false,
                        attempts,
                        latency: started.elapsed(),
                    });
                }
                Err(err) => {
                    if err.should_trip_breaker() {
                        self.breaker.record_failure().await;
                    } else {
                        // The upstream answered; the request itself was
                        // bad. Not held against service health, but an
                        // inconclusive half-open trial reopens the circuit.
                        self.breaker.record_inconclusive().await;
                    }

                    let can_retry =
                        attempts < max_attempts && self.config.retry.is_retryable(&err);
                    warn!(
                        service = %request.service,
                        endpoint = %request.endpoint,
                        attempt = attempts,
                        error = %err,
                        will_retry = can_retry,
                        "upstream attempt failed"
                    );
                    if !can_retry {
                        break err;
                    }

                    // attempt is 1-based here, delay schedules are 0-based
                    let delay = backoff.jittered_delay(attempts - 1);
                    debug!(
                        service = %request.service,
                        delay_ms = delay.as_millis() as u64,
                        "backing off before retry"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        match self.fallbacks.resolve(request, &error).await {
            FallbackOutcome::Recovered { data, strategy } => {
                info!(
                    service = %request.service,
                    endpoint = %request.endpoint,
                    strategy = %strategy,
                    "request served by fallback"
                );
                Ok(ApiResponse {
                    data,
                    status: 200,
                    source: ResponseSource::Fallback,
                    from_cache: false,
                    attempts,
                    latency: started.elapsed(),
                })
            }
            FallbackOutcome::Exhausted { strategies_tried } => Err(ApiError::FallbackExhausted {
                service: request.service.clone(),
                endpoint: request.endpoint.clone(),
                attempts: attempts as usize,
                strategies_tried,
                source: Box::new(error),
            }),
            FallbackOutcome::NotCovered => Err(error),
        }
    }

    async fn cache_lookup(&self, request: &ApiRequest) -> Option<Value> {
        if !request.is_idempotent_read() || request.skip_cache {
            return None;
        }
        let cache = self.cache.as_ref()?;
        cache.get(&request.cache_key()).await
    }

    /// Successful GET responses are cached even when the read skipped the
    /// cache, so a forced refresh still updates it.
    async fn cache_store(&self, request: &ApiRequest, body: &Value) {
        if !request.is_idempotent_read() {
            return;
        }
        if let Some(cache) = &self.cache {
            cache.set(request.cache_key(), body.clone()).await;
        }
    }

    /// Probe the service's health endpoint once and update the health flag.
    ///
    /// The flag is informational; it never gates dispatch the way the
    /// breaker does. Services without a health section always read healthy.
    pub async fn check_health(&self) -> bool {
        let Some(health) = &self.config.health else {
            return true;
        };
        let request = ApiRequest::get(self.config.name.clone(), health.endpoint.clone());
        let ok = self.transport.send(&self.config, &request).await.is_ok();

        let was = self.healthy.swap(ok, Ordering::Relaxed);
        if was != ok {
            if ok {
                info!(service = %self.config.name, "health probe recovered");
            } else {
                warn!(service = %self.config.name, "health probe failed");
            }
        }
        ok
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// True when the breaker would admit a call right now
    pub async fn breaker_ready(&self) -> bool {
        self.breaker.is_ready().await
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.breaker.state().await
    }

    pub async fn circuit_stats(&self) -> CircuitStats {
        self.breaker.stats().await
    }

    pub async fn cache_stats(&self) -> Option<CacheStats> {
        match &self.cache {
            Some(cache) => Some(cache.stats().await),
            None => None,
        }
    }
}
