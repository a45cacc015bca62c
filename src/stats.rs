/*!
 * Operational snapshots of the orchestrator and its services
 */

use chrono::{DateTime, Utc};

use rotunda_core_resilience::circuit_breaker::CircuitStats;
use rotunda_core_resilience::dead_letter::DeadLetterStats;
use rotunda_core_resilience::CacheStats;

/// Point-in-time view of one service
#[derive(Debug, Clone)]
pub struct ServiceStats {
    /// Service name from configuration
    pub service: String,
    /// Last health probe verdict (true when no probe is configured)
    pub healthy: bool,
    /// Circuit breaker snapshot
    pub circuit: CircuitStats,
    /// Fraction of the rate budget consumed, None when unlimited
    pub rate_utilization: Option<f64>,
    /// Requests waiting in the queue for this service
    pub queue_depth: usize,
    /// Requests currently executing against this service
    pub in_flight: usize,
    /// Cache counters, None when caching is disabled
    pub cache: Option<CacheStats>,
}

/// Point-in-time view of the whole orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorStats {
    /// When the snapshot was taken
    pub taken_at: DateTime<Utc>,
    /// Requests waiting across all services
    pub queue_depth: usize,
    /// Per-service snapshots, sorted by name
    pub services: Vec<ServiceStats>,
    /// Dead-letter queue counters
    pub dead_letters: DeadLetterStats,
}

impl OrchestratorStats {
    /// Look up one service's snapshot by name
    pub fn service(&self, name: &str) -> Option<&ServiceStats> {
        self.services.iter().find(|s| s.service == name)
    }

    /// Print formatted statistics
    pub fn print(&self) {
        println!("📊 Rotunda Orchestrator Snapshot");
        println!("================================\n");

        println!(
            "Taken at: {}",
            self.taken_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        println!("Queued requests: {}\n", self.queue_depth);

        for service in &self.services {
            let health = if service.healthy { "✅" } else { "❌" };
            println!("{} {}", health, service.service);
            println!("   Circuit: {}", service.circuit.state.label());
            println!(
                "   Window: {} failures / {} requests",
                service.circuit.failures_in_window, service.circuit.requests_in_window
            );
            if let Some(until) = service.circuit.time_until_probe {
                println!(
                    "   Next trial call in {}",
                    format_duration(until.as_millis() as u64)
                );
            }
            if let Some(utilization) = service.rate_utilization {
                println!("   Rate budget used: {:.0}%", utilization * 100.0);
            }
            println!(
                "   Queued: {}   In flight: {}",
                service.queue_depth, service.in_flight
            );
            if let Some(cache) = &service.cache {
                println!(
                    "   Cache: {} entries, {:.1}% hit rate",
                    cache.len,
                    cache.hit_rate() * 100.0
                );
            }
            println!();
        }

        println!(
            "💀 Dead letters: {} held ({} received, {} dropped)",
            self.dead_letters.current_count,
            self.dead_letters.total_received,
            self.dead_letters.total_dropped
        );
    }
}

/// Format duration into human-readable format
fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        return format!("{}ms", ms);
    }

    let seconds = ms / 1000;
    let minutes = seconds / 60;
    let hours = minutes / 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes % 60, seconds % 60)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds % 60)
    } else {
        format!("{}s", seconds)
    }
}
