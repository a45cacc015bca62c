/*!
 * Integration tests for the per-service resilience layers
 *
 * These tests drive a ResilientClient through a scripted transport to verify:
 * - Retry with backoff against transient failures
 * - Circuit breaker trip, hold, and single-call trial recovery
 * - TTL response caching for idempotent reads
 * - Fallback chains when the primary path is exhausted
 * - Error categorization driving retry decisions
 */

use rotunda::config::{CircuitBreakerSettings, RetryPolicy, ServiceConfig};
use rotunda::error::ApiError;
use rotunda::fallback::StaticFallback;
use rotunda::resilience::circuit_breaker::CircuitState;
use rotunda::transport::mock::MockTransport;
use rotunda::transport::{ApiRequest, ResponseSource};
use rotunda::ResilientClient;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Client config tuned for test speed: millisecond backoff, no jitter,
/// breaker thresholds high enough to stay out of the way, cache off.
fn fast_config(name: &str) -> ServiceConfig {
    let mut config = ServiceConfig::new(name, "https://api.example.test");
    config.retry = RetryPolicy {
        max_attempts: 3,
        base_delay_ms: 5,
        max_delay_ms: 20,
        jitter: 0.0,
        ..Default::default()
    };
    config.circuit_breaker = CircuitBreakerSettings {
        failure_threshold: 100,
        minimum_requests: 100,
        ..Default::default()
    };
    config.cache.enabled = false;
    config
}

fn network_err(service: &str, endpoint: &str) -> ApiError {
    ApiError::Network {
        service: service.to_string(),
        endpoint: endpoint.to_string(),
        message: "connection reset by peer".to_string(),
    }
}

#[tokio::test]
async fn test_retry_recovers_from_transient_failures() {
    let transport = MockTransport::new();
    transport.enqueue_err(network_err("congress", "/bills/recent"));
    transport.enqueue_err(network_err("congress", "/bills/recent"));
    transport.enqueue_ok(json!({"bills": [{"number": "HR123"}]}));

    let client = ResilientClient::new(fast_config("congress"), Arc::new(transport.clone()));
    let response = client
        .call(&ApiRequest::get("congress", "/bills/recent"))
        .await
        .expect("should succeed after retries");

    assert_eq!(response.source, ResponseSource::Api);
    assert_eq!(response.attempts, 3, "two failures plus the success");
    assert_eq!(transport.calls(), 3);
    assert_eq!(response.data["bills"][0]["number"], "HR123");
}

#[tokio::test]
async fn test_client_errors_skip_retry_entirely() {
    let transport = MockTransport::new();
    transport.enqueue_status(404, json!({"error": "no such bill"}));

    let client = ResilientClient::new(fast_config("congress"), Arc::new(transport.clone()));
    let err = client
        .call(&ApiRequest::get("congress", "/bills/HR0"))
        .await
        .expect_err("a 404 is not retryable");

    assert!(matches!(err, ApiError::UpstreamClient { status: 404, .. }));
    assert_eq!(transport.calls(), 1, "bad requests get exactly one attempt");
}

#[tokio::test]
async fn test_rate_limit_status_is_retried() {
    let transport = MockTransport::new();
    transport.enqueue_status(429, json!({"error": "slow down"}));
    transport.enqueue_ok(json!({"ok": true}));

    let client = ResilientClient::new(fast_config("congress"), Arc::new(transport.clone()));
    let response = client
        .call(&ApiRequest::get("congress", "/bills/recent"))
        .await
        .expect("429 should retry and then succeed");

    assert_eq!(response.source, ResponseSource::Api);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_circuit_breaker_opens_after_threshold() {
    let transport = MockTransport::new();
    transport.enqueue_err_times(network_err("alpha", "/submit"), 3);

    let mut config = fast_config("alpha");
    config.retry.max_attempts = 1;
    config.circuit_breaker = CircuitBreakerSettings {
        failure_threshold: 3,
        minimum_requests: 1,
        recovery_timeout_ms: 60_000,
        monitoring_period_ms: 60_000,
    };

    let client = ResilientClient::new(config, Arc::new(transport.clone()));
    for _ in 0..3 {
        let err = client
            .call(&ApiRequest::post("alpha", "/submit"))
            .await
            .expect_err("scripted failure");
        assert!(matches!(err, ApiError::Network { .. }));
    }

    // Threshold reached: the fourth call is refused without touching the
    // upstream at all
    let err = client
        .call(&ApiRequest::post("alpha", "/submit"))
        .await
        .expect_err("circuit should be open");
    assert!(matches!(err, ApiError::CircuitOpen { .. }));
    assert_eq!(transport.calls(), 3, "rejected calls never reach the wire");
    assert_eq!(client.circuit_state().await.label(), "open");
}

#[tokio::test]
async fn test_circuit_breaker_recovers_through_trial_call() {
    let transport = MockTransport::new();
    transport.enqueue_err_times(network_err("alpha", "/submit"), 2);
    transport.enqueue_ok(json!({"accepted": true}));

    let mut config = fast_config("alpha");
    config.retry.max_attempts = 1;
    config.circuit_breaker = CircuitBreakerSettings {
        failure_threshold: 2,
        minimum_requests: 1,
        recovery_timeout_ms: 50,
        monitoring_period_ms: 60_000,
    };

    let client = ResilientClient::new(config, Arc::new(transport.clone()));
    for _ in 0..2 {
        let _ = client.call(&ApiRequest::post("alpha", "/submit")).await;
    }
    assert_eq!(client.circuit_state().await.label(), "open");

    // After the recovery timeout a single trial call is allowed; its
    // success closes the circuit again
    tokio::time::sleep(Duration::from_millis(80)).await;
    let response = client
        .call(&ApiRequest::post("alpha", "/submit"))
        .await
        .expect("trial call should go through and succeed");
    assert_eq!(response.source, ResponseSource::Api);
    assert_eq!(client.circuit_state().await, CircuitState::Closed);
}

#[tokio::test]
async fn test_failed_trial_call_reopens_circuit() {
    let transport = MockTransport::new();
    transport.enqueue_err_times(network_err("alpha", "/submit"), 3);

    let mut config = fast_config("alpha");
    config.retry.max_attempts = 1;
    config.circuit_breaker = CircuitBreakerSettings {
        failure_threshold: 2,
        minimum_requests: 1,
        recovery_timeout_ms: 30,
        monitoring_period_ms: 60_000,
    };

    let client = ResilientClient::new(config, Arc::new(transport.clone()));
    for _ in 0..2 {
        let _ = client.call(&ApiRequest::post("alpha", "/submit")).await;
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    let err = client
        .call(&ApiRequest::post("alpha", "/submit"))
        .await
        .expect_err("trial call fails");
    assert!(matches!(err, ApiError::Network { .. }));
    assert_eq!(client.circuit_state().await.label(), "open");
    assert_eq!(transport.calls(), 3);
}

#[tokio::test]
async fn test_cache_serves_repeat_reads_without_upstream_calls() {
    let transport = MockTransport::new();
    transport.enqueue_ok(json!({"legislators": ["A", "B"]}));

    let mut config = fast_config("openstates");
    config.cache.enabled = true;
    config.cache.ttl_ms = 60_000;

    let client = ResilientClient::new(config, Arc::new(transport.clone()));
    let request = ApiRequest::get("openstates", "/legislators?state=md");

    let first = client.call(&request).await.expect("live call");
    assert_eq!(first.source, ResponseSource::Api);
    assert!(!first.from_cache);

    let second = client.call(&request).await.expect("cached call");
    assert_eq!(second.source, ResponseSource::Cache);
    assert!(second.from_cache);
    assert_eq!(second.attempts, 0, "cache hits place no upstream calls");
    assert_eq!(second.data, first.data);
    assert_eq!(transport.calls(), 1);

    let stats = client.cache_stats().await.expect("cache is enabled");
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn test_fallback_serves_degraded_data_after_exhaustion() {
    let transport = MockTransport::new();
    transport.enqueue_err_times(network_err("congress", "/bills/recent"), 3);

    let mut client = ResilientClient::new(fast_config("congress"), Arc::new(transport.clone()));
    client.add_fallback(Arc::new(StaticFallback::new(
        "empty-bills",
        json!({"bills": [], "degraded": true}),
    )));

    let response = client
        .call(&ApiRequest::get("congress", "/bills/recent"))
        .await
        .expect("fallback should answer");

    assert_eq!(response.source, ResponseSource::Fallback);
    assert_eq!(response.data["degraded"], true);
    assert_eq!(transport.calls(), 3, "all retry attempts ran first");
}

#[tokio::test]
async fn test_fallback_declines_errors_outside_its_categories() {
    let transport = MockTransport::new();
    transport.enqueue_status(404, json!({"error": "gone"}));

    // This fallback only covers server-side trouble; a 404 passes through
    let mut client = ResilientClient::new(fast_config("congress"), Arc::new(transport));
    client.add_fallback(Arc::new(
        StaticFallback::new("outage-banner", json!({"bills": []})).for_categories(vec![
            rotunda::ErrorCategory::Network,
            rotunda::ErrorCategory::Server,
        ]),
    ));

    let err = client
        .call(&ApiRequest::get("congress", "/bills/HR0"))
        .await
        .expect_err("no fallback covers a client error");
    assert!(matches!(err, ApiError::UpstreamClient { status: 404, .. }));
}

#[tokio::test]
async fn test_higher_priority_fallback_answers_first() {
    let transport = MockTransport::new();
    transport.enqueue_err(network_err("congress", "/bills/recent"));

    let mut config = fast_config("congress");
    config.retry.max_attempts = 1;

    let mut client = ResilientClient::new(config, Arc::new(transport));
    client.add_fallback(Arc::new(
        StaticFallback::new("last-resort", json!({"bills": null})).with_priority(1),
    ));
    client.add_fallback(Arc::new(
        StaticFallback::new("stale-snapshot", json!({"bills": ["cached"]})).with_priority(10),
    ));

    let response = client
        .call(&ApiRequest::get("congress", "/bills/recent"))
        .await
        .expect("fallback should answer");
    assert_eq!(response.data["bills"][0], "cached");
}

#[tokio::test]
async fn test_retry_policy_follows_error_categories() {
    let policy = RetryPolicy::default();

    assert!(policy.is_retryable(&network_err("x", "/y")));
    assert!(policy.is_retryable(&ApiError::Timeout {
        service: "x".to_string(),
        endpoint: "/y".to_string(),
        elapsed: Duration::from_secs(30),
    }));
    assert!(policy.is_retryable(&ApiError::UpstreamServer {
        service: "x".to_string(),
        endpoint: "/y".to_string(),
        status: 503,
    }));
    assert!(policy.is_retryable(&ApiError::RateLimited {
        service: "x".to_string(),
        endpoint: "/y".to_string(),
        retry_after: None,
    }));
    // Retryable category alone is not enough: the status must also be on
    // the list, and 501 is not
    assert!(!policy.is_retryable(&ApiError::UpstreamServer {
        service: "x".to_string(),
        endpoint: "/y".to_string(),
        status: 501,
    }));
    assert!(!policy.is_retryable(&ApiError::UpstreamClient {
        service: "x".to_string(),
        endpoint: "/y".to_string(),
        status: 404,
    }));
    assert!(!policy.is_retryable(&ApiError::ShuttingDown));
}
