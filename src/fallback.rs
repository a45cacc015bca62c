/*!
 * Fallback strategies for degraded operation
 *
 * When every upstream attempt for a request has failed, the fallback chain
 * gets one shot at producing a usable response: stale data, bundled static
 * data, an alternate provider. Strategies run in priority order and the
 * first one that both accepts the failure and produces data wins.
 */

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ApiError, ErrorCategory};
use crate::transport::ApiRequest;

/// One way to answer a request after the upstream has failed
#[async_trait]
pub trait FallbackStrategy: Send + Sync {
    /// Name used in logs and in `FallbackExhausted` errors
    fn name(&self) -> &str;

    /// Higher priority strategies are consulted first
    fn priority(&self) -> i32 {
        0
    }

    /// Whether this strategy wants to handle the given failure
    fn accepts(&self, error: &ApiError) -> bool;

    /// Produce replacement data for the request
    async fn handle(&self, request: &ApiRequest) -> Result<Value, ApiError>;
}

/// What the chain came up with for a failed request
#[derive(Debug)]
pub enum FallbackOutcome {
    /// A strategy produced data
    Recovered { data: Value, strategy: String },

    /// At least one strategy accepted the failure but none produced data
    Exhausted { strategies_tried: Vec<String> },

    /// No strategy accepted this failure
    NotCovered,
}

/// Ordered collection of fallback strategies
#[derive(Clone, Default)]
pub struct FallbackChain {
    strategies: Vec<Arc<dyn FallbackStrategy>>,
}

impl FallbackChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a strategy, keeping the chain sorted by descending priority.
    /// Strategies with equal priority stay in registration order.
    pub fn register(&mut self, strategy: Arc<dyn FallbackStrategy>) {
        self.strategies.push(strategy);
        self.strategies
            .sort_by(|a, b| b.priority().cmp(&a.priority()));
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Walk the chain for a failed request.
    ///
    /// Strategies that decline the error are skipped without counting as
    /// tried. A strategy that accepts but fails to produce data is logged
    /// and the walk continues with the next one.
    pub async fn resolve(&self, request: &ApiRequest, error: &ApiError) -> FallbackOutcome {
        let mut tried = Vec::new();

        for strategy in &self.strategies {
            if !strategy.accepts(error) {
                continue;
            }
            debug!(
                service = %request.service,
                endpoint = %request.endpoint,
                strategy = strategy.name(),
                "trying fallback strategy"
            );
            tried.push(strategy.name().to_string());

            match strategy.handle(request).await {
                Ok(data) => {
                    debug!(
                        service = %request.service,
                        strategy = strategy.name(),
                        "fallback produced a response"
                    );
                    return FallbackOutcome::Recovered {
                        data,
                        strategy: strategy.name().to_string(),
                    };
                }
                Err(e) => {
                    warn!(
                        service = %request.service,
                        strategy = strategy.name(),
                        error = %e,
                        "fallback strategy failed, trying next"
                    );
                }
            }
        }

        if tried.is_empty() {
            FallbackOutcome::NotCovered
        } else {
            FallbackOutcome::Exhausted {
                strategies_tried: tried,
            }
        }
    }
}

/// Fallback that returns a fixed JSON document, optionally limited to
/// certain error categories.
pub struct StaticFallback {
    name: String,
    priority: i32,
    data: Value,
    categories: Option<Vec<ErrorCategory>>,
}

impl StaticFallback {
    /// Accepts every failure and replies with `data`.
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            data,
            categories: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Restrict this fallback to failures in the given categories.
    pub fn for_categories(mut self, categories: Vec<ErrorCategory>) -> Self {
        self.categories = Some(categories);
        self
    }
}

#[async_trait]
impl FallbackStrategy for StaticFallback {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn accepts(&self, error: &ApiError) -> bool {
        match &self.categories {
            Some(categories) => categories.contains(&error.category()),
            None => true,
        }
    }

    async fn handle(&self, _request: &ApiRequest) -> Result<Value, ApiError> {
        Ok(self.data.clone())
    }
}
