/*!
 * Degraded Dashboard Example
 *
 * Walks a civic-dashboard request mix through the orchestrator:
 * - A healthy service answering live
 * - A repeat read served from cache
 * - A flaky service recovering through its fallback chain
 * - A bad request landing in the dead-letter queue
 * - The stats snapshot that a dashboard status page would render
 *
 * Runs against the scripted mock transport, so no network is touched:
 *
 *   cargo run --example degraded_dashboard --features test-utils
 */

use std::sync::Arc;

use rotunda::config::{OrchestratorConfig, RetryPolicy, ServiceConfig};
use rotunda::error::ApiError;
use rotunda::fallback::StaticFallback;
use rotunda::transport::mock::MockTransport;
use rotunda::transport::ApiRequest;
use rotunda::RequestOrchestrator;
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("=== Degraded Dashboard Demo ===\n");

    // 1. Two upstream services: congress is healthy, openstates is having
    //    a bad day
    println!("1. Configuring services:");
    let mut congress = ServiceConfig::new("congress", "https://api.congress.gov/v3");
    congress.retry = RetryPolicy {
        max_attempts: 2,
        base_delay_ms: 10,
        max_delay_ms: 50,
        jitter: 0.0,
        ..Default::default()
    };
    let mut openstates = ServiceConfig::new("openstates", "https://v3.openstates.org");
    openstates.retry = congress.retry.clone();
    openstates.cache.enabled = false;

    let config = OrchestratorConfig {
        services: vec![congress, openstates],
        max_requeues: 0,
        ..Default::default()
    };
    for service in &config.services {
        println!("   ✓ {} -> {}", service.name, service.base_url);
    }

    let transport = MockTransport::new();
    let orchestrator = RequestOrchestrator::builder(config)
        .transport(Arc::new(transport.clone()))
        .fallback(
            "openstates",
            Arc::new(StaticFallback::new(
                "empty-legislators",
                json!({"legislators": [], "degraded": true}),
            )),
        )
        .build()?;
    orchestrator.start().await;

    // 2. A live read from the healthy service
    println!("\n2. Fetching recent bills from congress:");
    transport.enqueue_ok(json!({"bills": [
        {"number": "HR1234", "title": "Example Infrastructure Act"},
        {"number": "S567", "title": "Example Transparency Act"},
    ]}));
    let request = ApiRequest::get("congress", "/bill?limit=2");
    let response = orchestrator.enqueue(request.clone(), 5).await?;
    println!(
        "   ✓ {} bills via {} ({} upstream attempt(s))",
        response.data["bills"].as_array().map(Vec::len).unwrap_or(0),
        response.source,
        response.attempts
    );

    // 3. The same read again: answered from cache, upstream untouched
    println!("\n3. Repeating the read:");
    let calls_before = transport.calls();
    let cached = orchestrator.enqueue(request, 5).await?;
    println!(
        "   ✓ Served via {} (upstream calls: {} before, {} after)",
        cached.source,
        calls_before,
        transport.calls()
    );

    // 4. The flaky service exhausts its retries, then the fallback answers
    println!("\n4. Fetching legislators from openstates (upstream down):");
    transport.enqueue_err_times(
        ApiError::Network {
            service: "openstates".to_string(),
            endpoint: "/legislators".to_string(),
            message: "connection refused".to_string(),
        },
        2,
    );
    let degraded = orchestrator
        .enqueue(ApiRequest::get("openstates", "/legislators?state=md"), 8)
        .await?;
    println!(
        "   ✓ Answered via {} fallback, degraded = {}",
        degraded.source, degraded.data["degraded"]
    );

    // 5. A request for a bill that does not exist: not retryable, so it
    //    goes straight to the dead-letter queue
    println!("\n5. Requesting a bill that does not exist:");
    transport.enqueue_status(404, json!({"error": "no such bill"}));
    match orchestrator
        .enqueue(ApiRequest::get("congress", "/bill/hr/0"), 1)
        .await
    {
        Ok(_) => println!("   ✗ Unexpectedly succeeded"),
        Err(e) => println!("   ✓ Refused: {}", e),
    }
    for letter in orchestrator.dead_letters().await {
        println!(
            "   💀 Dead letter #{}: {} {} ({})",
            letter.request_id, letter.service, letter.endpoint, letter.failure_reason
        );
    }

    // 6. The snapshot a status page would render
    println!("\n6. Orchestrator snapshot:");
    orchestrator.stats().await.print();

    // 7. Wind down; queued work would be answered with ShuttingDown
    println!("\n7. Shutting down:");
    orchestrator.shutdown().await;
    println!("   ✓ All callers answered, queue drained");

    println!("\n=== Demo Complete ===");
    Ok(())
}
