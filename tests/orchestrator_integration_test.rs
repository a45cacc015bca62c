/*!
 * End-to-end tests for the request orchestrator
 *
 * These tests run the full dispatch pipeline over a scripted transport:
 * - Priority ordering across a burst of queued requests
 * - Rate-limited services draining as their window frees
 * - Re-queue on transient failure, dead-lettering on exhaustion
 * - Shutdown under load with every caller answered
 * - Stats snapshots and TOML config round-trips
 */

use rotunda::config::{
    CircuitBreakerSettings, HealthCheckSettings, OrchestratorConfig, RateLimitSettings,
    RetryPolicy, ServiceConfig,
};
use rotunda::error::ApiError;
use rotunda::resilience::dead_letter::FailureReason;
use rotunda::transport::mock::MockTransport;
use rotunda::transport::ApiRequest;
use rotunda::RequestOrchestrator;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn fast_service(name: &str) -> ServiceConfig {
    let mut config = ServiceConfig::new(name, "https://api.example.test");
    config.retry = RetryPolicy {
        max_attempts: 1,
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
    config.rate_limit.requests = 0;
    config
}

fn orchestrator_config(services: Vec<ServiceConfig>) -> OrchestratorConfig {
    OrchestratorConfig {
        services,
        batch_size: 8,
        idle_sleep_ms: 5,
        max_requeues: 1,
        dead_letter_capacity: 64,
        ..Default::default()
    }
}

fn network_err(service: &str, endpoint: &str) -> ApiError {
    ApiError::Network {
        service: service.to_string(),
        endpoint: endpoint.to_string(),
        message: "connection reset by peer".to_string(),
    }
}

#[tokio::test]
async fn test_burst_dispatches_in_priority_order_per_service() {
    // Unscripted requests succeed with an empty body, so only ordering
    // matters here
    let transport = MockTransport::new();
    let mut congress = fast_service("congress");
    congress.max_concurrency = 1;
    let mut openstates = fast_service("openstates");
    openstates.max_concurrency = 1;

    let orchestrator = RequestOrchestrator::builder(orchestrator_config(vec![
        congress, openstates,
    ]))
    .transport(Arc::new(transport.clone()))
    .build()
    .expect("valid config");

    // Queue the burst before dispatch starts so ordering is decided purely
    // by priority
    let mut pendings = Vec::new();
    for (service, endpoint, priority) in [
        ("congress", "/bills", 2),
        ("congress", "/votes", 8),
        ("openstates", "/legislators", 9),
        ("congress", "/members", 5),
        ("openstates", "/bills", 1),
    ] {
        pendings.push(
            orchestrator
                .submit(ApiRequest::get(service, endpoint), priority)
                .await
                .expect("queued"),
        );
    }

    orchestrator.start().await;
    for pending in pendings {
        pending.wait().await.expect("all requests succeed");
    }

    let seen = transport.requests();
    let congress_order: Vec<&str> = seen
        .iter()
        .filter(|r| r.service == "congress")
        .map(|r| r.endpoint.as_str())
        .collect();
    let openstates_order: Vec<&str> = seen
        .iter()
        .filter(|r| r.service == "openstates")
        .map(|r| r.endpoint.as_str())
        .collect();
    assert_eq!(congress_order, vec!["/votes", "/members", "/bills"]);
    assert_eq!(openstates_order, vec!["/legislators", "/bills"]);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_rate_limited_service_drains_as_window_frees() {
    let transport = MockTransport::new();
    let mut service = fast_service("openstates");
    service.rate_limit = RateLimitSettings {
        requests: 2,
        window_ms: 120,
    };

    let orchestrator =
        RequestOrchestrator::new(orchestrator_config(vec![service]), Arc::new(transport.clone()))
            .expect("valid config");
    orchestrator.start().await;

    let started = Instant::now();
    let mut pendings = Vec::new();
    for endpoint in ["/a", "/b", "/c", "/d"] {
        pendings.push(
            orchestrator
                .submit(ApiRequest::get("openstates", endpoint), 0)
                .await
                .expect("queued"),
        );
    }
    for pending in pendings {
        pending.wait().await.expect("admitted once the window frees");
    }

    // Two fit the first window; the other two had to wait it out rather
    // than fail
    assert_eq!(transport.calls(), 4);
    assert!(
        started.elapsed() >= Duration::from_millis(100),
        "second half of the burst should wait for the window"
    );

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_exhausted_requeues_reach_the_dead_letter_queue() {
    let transport = MockTransport::new();
    transport.enqueue_err_times(network_err("congress", "/bills/recent"), 10);

    let orchestrator = RequestOrchestrator::new(
        orchestrator_config(vec![fast_service("congress")]),
        Arc::new(transport.clone()),
    )
    .expect("valid config");
    orchestrator.start().await;

    let err = orchestrator
        .enqueue(ApiRequest::get("congress", "/bills/recent"), 0)
        .await
        .expect_err("upstream never recovers");
    assert!(matches!(err, ApiError::Network { .. }));
    assert_eq!(transport.calls(), 2, "initial dispatch plus one re-queue");

    let letters = orchestrator.dead_letters().await;
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].service, "congress");
    assert_eq!(letters[0].endpoint, "/bills/recent");
    assert!(matches!(
        letters[0].failure_reason,
        FailureReason::RetriesExhausted { attempts: 2 }
    ));
    assert!(letters[0].last_error.contains("connection reset"));
    assert!(letters[0].first_failed_at <= letters[0].last_failed_at);

    // Draining hands the records over and clears the queue
    assert_eq!(orchestrator.drain_dead_letters().await.len(), 1);
    assert!(orchestrator.dead_letters().await.is_empty());

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_one_failing_service_leaves_the_other_untouched() {
    let transport = MockTransport::new();
    transport.enqueue_err_times(network_err("statehouse", "/sessions"), 4);

    let mut statehouse = fast_service("statehouse");
    statehouse.circuit_breaker = CircuitBreakerSettings {
        failure_threshold: 2,
        minimum_requests: 1,
        recovery_timeout_ms: 60_000,
        monitoring_period_ms: 60_000,
    };
    let config = OrchestratorConfig {
        max_requeues: 0,
        ..orchestrator_config(vec![fast_service("congress"), statehouse])
    };
    let orchestrator = RequestOrchestrator::new(config, Arc::new(transport.clone()))
        .expect("valid config");
    orchestrator.start().await;

    // statehouse fails until its breaker opens
    for _ in 0..2 {
        let err = orchestrator
            .enqueue(ApiRequest::get("statehouse", "/sessions"), 0)
            .await
            .expect_err("scripted failure");
        assert!(matches!(err, ApiError::Network { .. }));
    }

    // congress keeps answering normally
    let response = orchestrator
        .enqueue(ApiRequest::get("congress", "/bills"), 0)
        .await
        .expect("healthy service unaffected");
    assert_eq!(response.data, json!({}));

    let stats = orchestrator.stats().await;
    assert_eq!(stats.service("statehouse").unwrap().circuit.state.label(), "open");
    assert_eq!(stats.service("congress").unwrap().circuit.state.label(), "closed");
    assert_eq!(stats.dead_letters.total_received, 2);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_under_load_answers_every_caller() {
    let transport = MockTransport::new();
    let mut service = fast_service("congress");
    service.max_concurrency = 2;

    let orchestrator =
        RequestOrchestrator::new(orchestrator_config(vec![service]), Arc::new(transport))
            .expect("valid config");
    orchestrator.start().await;

    let mut pendings = Vec::new();
    for i in 0..12 {
        pendings.push(
            orchestrator
                .submit(ApiRequest::get("congress", format!("/bills/{i}")), 0)
                .await
                .expect("queued"),
        );
    }

    tokio::time::sleep(Duration::from_millis(2)).await;
    orchestrator.shutdown().await;

    // Every caller gets an answer: a real response if it dispatched in
    // time, ShuttingDown otherwise. Nobody hangs.
    for pending in pendings {
        match pending.wait().await {
            Ok(_) => {}
            Err(ApiError::ShuttingDown) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(orchestrator.queue_depth().await, 0);

    let err = orchestrator
        .submit(ApiRequest::get("congress", "/bills"), 0)
        .await
        .expect_err("refused after shutdown");
    assert!(matches!(err, ApiError::ShuttingDown));
}

#[tokio::test]
async fn test_config_round_trips_through_a_toml_file() {
    let mut congress = ServiceConfig::new("congress", "https://api.congress.gov/v3");
    congress.rate_limit = RateLimitSettings {
        requests: 5_000,
        window_ms: 3_600_000,
    };
    congress.health = Some(HealthCheckSettings {
        endpoint: "/health".to_string(),
        interval_ms: 30_000,
    });
    let openstates = ServiceConfig::new("openstates", "https://v3.openstates.org");
    let config = OrchestratorConfig {
        batch_size: 16,
        max_requeues: 3,
        ..orchestrator_config(vec![congress, openstates])
    };
    config.validate().expect("fixture config is valid");

    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("rotunda.toml");
    config.to_file(&path).expect("write config");

    let loaded = OrchestratorConfig::from_file(&path).expect("read config back");
    assert_eq!(loaded, config);
    assert_eq!(loaded.service("congress").unwrap().rate_limit.requests, 5_000);
    assert!(loaded.service("openstates").unwrap().health.is_none());
}
