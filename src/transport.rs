/*!
 * HTTP transport abstraction
 *
 * The orchestration layer never talks to reqwest directly. Everything goes
 * through the `Transport` trait so tests can script upstream behavior without
 * a network.
 */

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ServiceConfig;
use crate::error::ApiError;

/// HTTP method for an upstream request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

/// One upstream request as the orchestration layer sees it.
///
/// Params are kept in a `BTreeMap` so every serialization of the same
/// logical request comes out identically, which is what makes cache keys
/// deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    /// Configured service name this request targets
    pub service: String,

    /// Endpoint path, resolved against the service base URL
    pub endpoint: String,

    #[serde(default)]
    pub method: Method,

    /// Query parameters (GET/DELETE) or JSON body fields (POST/PUT)
    #[serde(default)]
    pub params: BTreeMap<String, String>,

    /// Bypass the response cache even for idempotent reads
    #[serde(default)]
    pub skip_cache: bool,
}

impl ApiRequest {
    pub fn new(service: impl Into<String>, endpoint: impl Into<String>, method: Method) -> Self {
        Self {
            service: service.into(),
            endpoint: endpoint.into(),
            method,
            params: BTreeMap::new(),
            skip_cache: false,
        }
    }

    pub fn get(service: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self::new(service, endpoint, Method::Get)
    }

    pub fn post(service: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self::new(service, endpoint, Method::Post)
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn skip_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }

    /// Only GET responses are cached.
    pub fn is_idempotent_read(&self) -> bool {
        self.method == Method::Get
    }

    /// Deterministic cache key: same service, endpoint, and params always
    /// produce the same key regardless of the order params were added.
    pub fn cache_key(&self) -> String {
        if self.params.is_empty() {
            return format!("{}:{}", self.service, self.endpoint);
        }
        let query: Vec<String> = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        format!("{}:{}?{}", self.service, self.endpoint, query.join("&"))
    }
}

/// Where a response ultimately came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    /// A live upstream call succeeded
    Api,
    /// Served from the response cache without touching the network
    Cache,
    /// A fallback strategy produced the data after the upstream failed
    Fallback,
}

impl std::fmt::Display for ResponseSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseSource::Api => write!(f, "api"),
            ResponseSource::Cache => write!(f, "cache"),
            ResponseSource::Fallback => write!(f, "fallback"),
        }
    }
}

/// A successful response with its provenance attached
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub data: Value,
    pub status: u16,
    pub source: ResponseSource,
    pub from_cache: bool,
    /// Upstream attempts actually placed (0 when served from cache)
    pub attempts: u32,
    pub latency: Duration,
}

/// Status and decoded body straight off the wire
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: Value,
}

impl RawResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }
}

/// Seam between the orchestration layer and the actual HTTP stack
///
/// `Ok` always means a usable 2xx response; implementations turn error
/// statuses into the matching `ApiError` variant.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        service: &ServiceConfig,
        request: &ApiRequest,
    ) -> Result<RawResponse, ApiError>;
}

/// Map an error status onto the failure taxonomy. 429 is split out from
/// the other 4xx codes because it says something about the service's
/// quota, not about the request.
fn status_error(status: u16, request: &ApiRequest, retry_after: Option<Duration>) -> Option<ApiError> {
    if status == 429 {
        return Some(ApiError::RateLimited {
            service: request.service.clone(),
            endpoint: request.endpoint.clone(),
            retry_after,
        });
    }
    if (400..500).contains(&status) {
        return Some(ApiError::UpstreamClient {
            service: request.service.clone(),
            endpoint: request.endpoint.clone(),
            status,
        });
    }
    if (500..600).contains(&status) {
        return Some(ApiError::UpstreamServer {
            service: request.service.clone(),
            endpoint: request.endpoint.clone(),
            status,
        });
    }
    None
}

/// Production transport backed by reqwest
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ApiError::InvalidConfig(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    fn classify_send_error(
        err: reqwest::Error,
        service: &ServiceConfig,
        request: &ApiRequest,
    ) -> ApiError {
        if err.is_timeout() {
            ApiError::Timeout {
                service: request.service.clone(),
                endpoint: request.endpoint.clone(),
                elapsed: service.timeout(),
            }
        } else {
            ApiError::Network {
                service: request.service.clone(),
                endpoint: request.endpoint.clone(),
                message: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        service: &ServiceConfig,
        request: &ApiRequest,
    ) -> Result<RawResponse, ApiError> {
        let url = format!(
            "{}{}",
            service.base_url.trim_end_matches('/'),
            request.endpoint
        );

        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Put => self.client.put(&url),
            Method::Delete => self.client.delete(&url),
        };

        // Reads carry params in the query string, writes in the body
        builder = match request.method {
            Method::Get | Method::Delete => builder.query(&request.params),
            Method::Post | Method::Put => builder.json(&request.params),
        };

        let response = builder
            .timeout(service.timeout())
            .send()
            .await
            .map_err(|e| Self::classify_send_error(e, service, request))?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        if let Some(err) = status_error(status, request, retry_after) {
            return Err(err);
        }

        let body: Value = response.json().await.map_err(|e| ApiError::Network {
            service: request.service.clone(),
            endpoint: request.endpoint.clone(),
            message: format!("invalid response body: {}", e),
        })?;

        Ok(RawResponse { status, body })
    }
}

/// Scripted transport for tests: replies are consumed in order, every
/// request is recorded, and calls are counted.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    pub struct MockTransport {
        script: Arc<Mutex<VecDeque<Result<RawResponse, ApiError>>>>,
        seen: Arc<Mutex<Vec<ApiRequest>>>,
        calls: Arc<AtomicUsize>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a 200 reply with the given body.
        pub fn enqueue_ok(&self, body: Value) {
            self.enqueue_status(200, body);
        }

        /// Queue a reply with an explicit status. Error statuses come back
        /// classified exactly as the real transport classifies them.
        pub fn enqueue_status(&self, status: u16, body: Value) {
            self.script
                .lock()
                .unwrap()
                .push_back(Ok(RawResponse { status, body }));
        }

        /// Queue a failure.
        pub fn enqueue_err(&self, err: ApiError) {
            self.script.lock().unwrap().push_back(Err(err));
        }

        /// Queue the same failure several times.
        pub fn enqueue_err_times(&self, err: ApiError, times: usize) {
            for _ in 0..times {
                self.enqueue_err(err.clone());
            }
        }

        /// Total requests that reached this transport.
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// Every request that reached this transport, in order.
        pub fn requests(&self) -> Vec<ApiRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(
            &self,
            _service: &ServiceConfig,
            request: &ApiRequest,
        ) -> Result<RawResponse, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request.clone());
            match self.script.lock().unwrap().pop_front() {
                Some(Ok(raw)) => match status_error(raw.status, request, None) {
                    Some(err) => Err(err),
                    None => Ok(raw),
                },
                Some(Err(err)) => Err(err),
                // Off-script calls succeed with an empty object
                None => Ok(RawResponse::ok(Value::Object(Default::default()))),
            }
        }
    }
}
