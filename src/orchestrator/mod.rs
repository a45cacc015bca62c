/*!
 * Cross-service request orchestration
 *
 * The orchestrator fronts every configured upstream with one priority
 * queue. A dispatch task scans the queue in order and admits whatever the
 * circuit breaker, concurrency, and rate gates allow, spawning the admitted
 * batch against the services' resilient clients. A failed call with
 * re-queue budget left parks on a backoff timer and re-enters at the front
 * of its priority class; everything else settles the caller's oneshot and,
 * when the failure is final, leaves a dead-letter record.
 */

pub mod queue;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tokio::sync::{oneshot, Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::ResilientClient;
use crate::config::OrchestratorConfig;
use crate::error::ApiError;
use crate::fallback::{FallbackChain, FallbackStrategy};
use crate::stats::{OrchestratorStats, ServiceStats};
use crate::transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
use rotunda_core_resilience::circuit_breaker::CircuitState;
use rotunda_core_resilience::dead_letter::{DeadLetterEntry, DeadLetterQueue, FailureReason};
use rotunda_core_resilience::SlidingWindowLimiter;

use queue::{PendingQueue, QueueKey, QueuedRequest};

/// One upstream service as the dispatcher sees it
struct ServiceHandle {
    client: ResilientClient,
    limiter: Option<SlidingWindowLimiter>,
    semaphore: Arc<Semaphore>,
}

struct Inner {
    config: OrchestratorConfig,
    services: HashMap<String, ServiceHandle>,
    queue: Mutex<PendingQueue>,
    dead_letters: Mutex<DeadLetterQueue>,
    next_request_id: AtomicU64,
    /// False once shutdown begins; submit refuses new work
    accepting: AtomicBool,
    /// True once shutdown begins; the loop and parked timers wind down
    stopping: AtomicBool,
    /// Wakes the dispatch loop when work arrives
    work_notify: Notify,
    /// Wakes parked re-queue timers so their callers get answers promptly
    shutdown_notify: Notify,
    dispatch_handle: Mutex<Option<JoinHandle<()>>>,
    requeue_tasks: Mutex<Vec<JoinHandle<()>>>,
    probe_handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to a queued request: the queue id plus the awaitable result
#[derive(Debug)]
pub struct PendingResponse {
    id: u64,
    rx: oneshot::Receiver<Result<ApiResponse, ApiError>>,
}

impl PendingResponse {
    /// Queue id, usable with [`RequestOrchestrator::adjust_priority`]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the request to settle
    pub async fn wait(self) -> Result<ApiResponse, ApiError> {
        self.rx.await.unwrap_or(Err(ApiError::ShuttingDown))
    }
}

/// Builder wiring a transport and fallback strategies into an orchestrator
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    transport: Option<Arc<dyn Transport>>,
    fallbacks: HashMap<String, FallbackChain>,
}

impl OrchestratorBuilder {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            transport: None,
            fallbacks: HashMap::new(),
        }
    }

    /// Use this transport instead of the default HTTP one
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Register a fallback strategy for one service
    ///
    /// May be called repeatedly; strategies run in priority order when the
    /// service's primary path is exhausted.
    pub fn fallback(mut self, service: &str, strategy: Arc<dyn FallbackStrategy>) -> Self {
        self.fallbacks
            .entry(service.to_string())
            .or_default()
            .register(strategy);
        self
    }

    /// Validate the configuration and assemble the orchestrator
    pub fn build(mut self) -> Result<RequestOrchestrator, ApiError> {
        self.config.validate().map_err(ApiError::InvalidConfig)?;

        let transport: Arc<dyn Transport> = match self.transport.take() {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new()?),
        };

        let mut services = HashMap::with_capacity(self.config.services.len());
        for service in &self.config.services {
            // A zero request budget means the service is unlimited
            let limiter = (service.rate_limit.requests > 0).then(|| {
                SlidingWindowLimiter::new(service.rate_limit.requests, service.rate_limit.window())
            });
            let chain = self.fallbacks.remove(&service.name).unwrap_or_default();
            let client =
                ResilientClient::new(service.clone(), transport.clone()).with_fallbacks(chain);
            services.insert(
                service.name.clone(),
                ServiceHandle {
                    client,
                    limiter,
                    semaphore: Arc::new(Semaphore::new(service.max_concurrency)),
                },
            );
        }
        for service in self.fallbacks.keys() {
            warn!(service = %service, "fallbacks registered for an unconfigured service, ignoring");
        }

        let dead_letter_capacity = self.config.dead_letter_capacity;
        Ok(RequestOrchestrator {
            inner: Arc::new(Inner {
                services,
                queue: Mutex::new(PendingQueue::new()),
                dead_letters: Mutex::new(DeadLetterQueue::new(dead_letter_capacity)),
                next_request_id: AtomicU64::new(0),
                accepting: AtomicBool::new(true),
                stopping: AtomicBool::new(false),
                work_notify: Notify::new(),
                shutdown_notify: Notify::new(),
                dispatch_handle: Mutex::new(None),
                requeue_tasks: Mutex::new(Vec::new()),
                probe_handles: Mutex::new(Vec::new()),
                config: self.config,
            }),
        })
    }
}

/// Cross-service coordinator over the configured resilient clients
///
/// Construction wires the services; [`start`](Self::start) spawns the
/// dispatch loop and health probes. Requests queue immediately either way
/// but only settle once the loop runs. Cheap to clone; clones share the
/// queue and services.
#[derive(Clone)]
pub struct RequestOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RequestOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestOrchestrator").finish_non_exhaustive()
    }
}

impl RequestOrchestrator {
    /// Builder for attaching a transport and fallback strategies
    pub fn builder(config: OrchestratorConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    /// Construct with an explicit transport and no fallbacks
    pub fn new(
        config: OrchestratorConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ApiError> {
        OrchestratorBuilder::new(config)
            .transport(transport)
            .build()
    }

    /// Start the dispatch loop and health probes. Idempotent.
    ///
    /// A stopped orchestrator stays stopped; starting it again does
    /// nothing rather than spawning tasks the completed shutdown will
    /// never reap.
    pub async fn start(&self) {
        if self.inner.stopping.load(Ordering::SeqCst) {
            return;
        }
        let mut slot = self.inner.dispatch_handle.lock().await;
        if slot.is_some() {
            return;
        }
        *slot = Some(tokio::spawn(dispatch_loop(self.inner.clone())));
        drop(slot);

        let mut probes = self.inner.probe_handles.lock().await;
        // Same rule as the queue push: re-checked under the lock the
        // shutdown sweep holds, so probes land before the sweep or not
        // at all.
        if self.inner.stopping.load(Ordering::SeqCst) {
            return;
        }
        for handle in self.inner.services.values() {
            let Some(health) = handle.client.config().health.clone() else {
                continue;
            };
            let client = handle.client.clone();
            let inner = self.inner.clone();
            probes.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(health.interval());
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            client.check_health().await;
                        }
                        _ = inner.shutdown_notify.notified() => break,
                    }
                }
            }));
        }
        drop(probes);

        info!(
            services = self.inner.services.len(),
            batch_size = self.inner.config.batch_size,
            "orchestrator started"
        );
    }

    /// Queue a request, returning its id and the awaitable result
    ///
    /// The id can re-prioritize the request while it waits. Unknown
    /// services are refused here rather than at dispatch.
    pub async fn submit(
        &self,
        request: ApiRequest,
        priority: i32,
    ) -> Result<PendingResponse, ApiError> {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            return Err(ApiError::ShuttingDown);
        }
        if !self.inner.services.contains_key(&request.service) {
            return Err(ApiError::UnknownService {
                service: request.service.clone(),
            });
        }

        let id = self.inner.next_request_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();
        let mut queue = self.inner.queue.lock().await;
        // Re-checked under the queue lock: the shutdown drain holds the
        // same lock, so the entry lands either before the drain or is
        // refused here, never stranded in a queue nothing will empty.
        if self.inner.stopping.load(Ordering::SeqCst) {
            return Err(ApiError::ShuttingDown);
        }
        debug!(
            id,
            service = %request.service,
            endpoint = %request.endpoint,
            priority,
            "request queued"
        );
        queue.push_back(QueuedRequest::new(id, request, priority, tx));
        drop(queue);
        self.inner.work_notify.notify_one();

        Ok(PendingResponse { id, rx })
    }

    /// Queue a request and wait for its result
    pub async fn enqueue(
        &self,
        request: ApiRequest,
        priority: i32,
    ) -> Result<ApiResponse, ApiError> {
        self.submit(request, priority).await?.wait().await
    }

    /// Move a pending request to a new priority class
    ///
    /// The request keeps its arrival order among its new peers. Returns
    /// false when the id is unknown or the request already dispatched.
    pub async fn adjust_priority(&self, id: u64, priority: i32) -> bool {
        let adjusted = self.inner.queue.lock().await.adjust_priority(id, priority);
        if adjusted {
            debug!(id, priority, "request re-prioritized");
            self.inner.work_notify.notify_one();
        }
        adjusted
    }

    /// Requests currently waiting for dispatch
    pub async fn queue_depth(&self) -> usize {
        self.inner.queue.lock().await.len()
    }

    /// The resilient client serving one service
    pub fn client(&self, service: &str) -> Option<&ResilientClient> {
        self.inner.services.get(service).map(|handle| &handle.client)
    }

    /// Copy of the dead-letter entries, oldest first
    pub async fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.inner
            .dead_letters
            .lock()
            .await
            .entries()
            .iter()
            .cloned()
            .collect()
    }

    /// Remove and return every dead-letter entry
    pub async fn drain_dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.inner.dead_letters.lock().await.drain()
    }

    /// Snapshot of queue, breaker, rate, and cache state across services
    pub async fn stats(&self) -> OrchestratorStats {
        let (queue_depth, depths) = {
            let queue = self.inner.queue.lock().await;
            (queue.len(), queue.service_depths())
        };

        let mut services = Vec::with_capacity(self.inner.services.len());
        for (name, handle) in &self.inner.services {
            let rate_utilization = match &handle.limiter {
                Some(limiter) => Some(limiter.utilization().await),
                None => None,
            };
            services.push(ServiceStats {
                service: name.clone(),
                healthy: handle.client.is_healthy(),
                circuit: handle.client.circuit_stats().await,
                rate_utilization,
                queue_depth: depths.get(name).copied().unwrap_or(0),
                in_flight: handle
                    .client
                    .config()
                    .max_concurrency
                    .saturating_sub(handle.semaphore.available_permits()),
                cache: handle.client.cache_stats().await,
            });
        }
        services.sort_by(|a, b| a.service.cmp(&b.service));

        OrchestratorStats {
            taken_at: Utc::now(),
            queue_depth,
            services,
            dead_letters: self.inner.dead_letters.lock().await.stats(),
        }
    }

    /// Stop accepting work, settle what is in flight, reject the rest
    ///
    /// Queued requests and parked re-queue timers all resolve with
    /// [`ApiError::ShuttingDown`]; no caller is left waiting. Idempotent.
    pub async fn shutdown(&self) {
        if self.inner.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.accepting.store(false, Ordering::SeqCst);
        info!("orchestrator shutting down");

        self.inner.shutdown_notify.notify_waiters();
        self.inner.work_notify.notify_waiters();

        let dispatch = self.inner.dispatch_handle.lock().await.take();
        match dispatch {
            Some(handle) => {
                if let Err(error) = handle.await {
                    warn!(error = %error, "dispatch task ended abnormally");
                }
            }
            // Never started; the queue still owes every waiter an answer
            None => drain_and_reject(&self.inner).await,
        }

        let timers = std::mem::take(&mut *self.inner.requeue_tasks.lock().await);
        for timer in timers {
            if let Err(error) = timer.await {
                warn!(error = %error, "re-queue timer ended abnormally");
            }
        }

        let probes = std::mem::take(&mut *self.inner.probe_handles.lock().await);
        for probe in probes {
            probe.abort();
        }

        info!("orchestrator stopped");
    }
}

/// Scan, admit, execute, settle. One pass per iteration.
async fn dispatch_loop(inner: Arc<Inner>) {
    debug!("dispatch loop running");
    loop {
        if inner.stopping.load(Ordering::SeqCst) {
            break;
        }

        let batch = collect_ready(&inner).await;
        if batch.is_empty() {
            tokio::select! {
                _ = inner.work_notify.notified() => {}
                _ = tokio::time::sleep(inner.config.idle_sleep()) => {}
            }
            continue;
        }

        let mut in_flight = Vec::with_capacity(batch.len());
        for (entry, permit) in batch {
            in_flight.push(tokio::spawn(execute_one(inner.clone(), entry, permit)));
        }
        for settled in futures::future::join_all(in_flight).await {
            if let Err(error) = settled {
                warn!(error = %error, "request task panicked");
            }
        }
    }

    drain_and_reject(&inner).await;
    debug!("dispatch loop stopped");
}

/// Collect up to a batch of requests whose gates all admit right now
///
/// Order follows the queue: priority first, then arrival. A request whose
/// service is missing a gate is skipped, never removed; a rate refusal
/// leaves it queued for a later pass. A service whose breaker is not
/// closed contributes at most one request per pass, keeping the half-open
/// trial a single call.
async fn collect_ready(inner: &Inner) -> Vec<(QueuedRequest, OwnedSemaphorePermit)> {
    let mut queue = inner.queue.lock().await;
    if queue.is_empty() {
        return Vec::new();
    }

    let mut circuit_states: HashMap<String, CircuitState> = HashMap::new();
    let mut probing: HashSet<String> = HashSet::new();
    let mut admitted: Vec<(QueueKey, OwnedSemaphorePermit)> = Vec::new();

    for (key, entry) in queue.iter() {
        if admitted.len() >= inner.config.batch_size {
            break;
        }
        let Some(handle) = inner.services.get(&entry.request.service) else {
            continue;
        };

        let state = match circuit_states.get(&entry.request.service) {
            Some(state) => *state,
            None => {
                let state = handle.client.circuit_state().await;
                circuit_states.insert(entry.request.service.clone(), state);
                state
            }
        };
        if state != CircuitState::Closed
            && (probing.contains(&entry.request.service) || !handle.client.breaker_ready().await)
        {
            continue;
        }

        let Ok(permit) = handle.semaphore.clone().try_acquire_owned() else {
            continue;
        };
        if let Some(limiter) = &handle.limiter {
            // Refusal keeps the request queued; the permit frees on drop
            if !limiter.try_admit().await {
                continue;
            }
        }

        if state != CircuitState::Closed {
            probing.insert(entry.request.service.clone());
        }
        admitted.push((*key, permit));
    }

    admitted
        .into_iter()
        .filter_map(|(key, permit)| queue.take(&key).map(|entry| (entry, permit)))
        .collect()
}

async fn execute_one(inner: Arc<Inner>, entry: QueuedRequest, permit: OwnedSemaphorePermit) {
    // submit() checked the service name, so the handle is always present
    let Some(handle) = inner.services.get(&entry.request.service) else {
        let service = entry.request.service.clone();
        entry.respond(Err(ApiError::UnknownService { service }));
        return;
    };

    let result = handle.client.call(&entry.request).await;
    drop(permit);

    match result {
        Ok(response) => {
            debug!(
                id = entry.id,
                service = %entry.request.service,
                source = %response.source,
                attempts = response.attempts,
                "request settled"
            );
            entry.respond(Ok(response));
        }
        Err(error) => handle_failure(&inner, entry, error).await,
    }
}

/// Decide what a failed dispatch becomes: a parked re-queue timer, or a
/// dead-lettered rejection back to the caller.
async fn handle_failure(inner: &Arc<Inner>, mut entry: QueuedRequest, error: ApiError) {
    let now = SystemTime::now();
    let first_failed_at = *entry.first_failed_at.get_or_insert(now);

    let handle = inner.services.get(&entry.request.service);
    let policy = handle.map(|handle| &handle.client.config().retry);

    // A 429 means the upstream's quota view is stricter than our window;
    // cool the window down so the dispatcher stops feeding it.
    let upstream = match &error {
        ApiError::FallbackExhausted { source, .. } => source.as_ref(),
        other => other,
    };
    if let ApiError::RateLimited { retry_after, .. } = upstream {
        if let Some(limiter) = handle.and_then(|handle| handle.limiter.as_ref()) {
            limiter.penalize(*retry_after).await;
        }
    }

    // CircuitOpen here means the breaker opened between the dispatch gate
    // and the call; the request deserves another pass once it settles.
    let requeueable = matches!(error, ApiError::CircuitOpen { .. })
        || policy.map(|p| p.is_retryable(&error)).unwrap_or(false);
    let budget_left = entry.retry_count < inner.config.max_requeues;

    if requeueable && budget_left && !inner.stopping.load(Ordering::SeqCst) {
        let delay = policy
            .map(|p| p.backoff().jittered_delay(entry.retry_count))
            .unwrap_or_default();
        entry.retry_count += 1;
        warn!(
            id = entry.id,
            service = %entry.request.service,
            retry = entry.retry_count,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "dispatch failed, parking for re-queue"
        );

        let mut timers = inner.requeue_tasks.lock().await;
        timers.retain(|timer| !timer.is_finished());
        timers.push(tokio::spawn(requeue_later(inner.clone(), entry, delay)));
        return;
    }

    let reason = match &error {
        ApiError::FallbackExhausted { .. } => FailureReason::FallbacksExhausted,
        _ if requeueable && budget_left => FailureReason::ShutdownRejected,
        _ if requeueable => FailureReason::RetriesExhausted {
            attempts: entry.retry_count + 1,
        },
        _ => FailureReason::NonRetryable,
    };
    warn!(
        id = entry.id,
        service = %entry.request.service,
        endpoint = %entry.request.endpoint,
        reason = %reason,
        error = %error,
        "request dead-lettered"
    );
    inner.dead_letters.lock().await.push(DeadLetterEntry {
        request_id: entry.id,
        service: entry.request.service.clone(),
        endpoint: entry.request.endpoint.clone(),
        failure_reason: reason,
        last_error: error.to_string(),
        first_failed_at,
        last_failed_at: now,
    });
    entry.respond(Err(error));
}

/// Sleep the backoff, then push the request back in at the front of its
/// priority class. A shutdown during the sleep rejects the caller instead.
async fn requeue_later(inner: Arc<Inner>, entry: QueuedRequest, delay: Duration) {
    let notified = inner.shutdown_notify.notified();
    tokio::pin!(notified);
    // Register before reading the flag; a signal between the two would
    // otherwise be missed.
    notified.as_mut().enable();
    if inner.stopping.load(Ordering::SeqCst) {
        reject_at_shutdown(&inner, entry).await;
        return;
    }

    tokio::select! {
        _ = &mut notified => {
            reject_at_shutdown(&inner, entry).await;
        }
        _ = tokio::time::sleep(delay) => {
            let mut queue = inner.queue.lock().await;
            // The flag is checked under the queue lock: the shutdown drain
            // holds the same lock, so the entry lands either before the
            // drain or on the rejection path, never stranded.
            if inner.stopping.load(Ordering::SeqCst) {
                drop(queue);
                reject_at_shutdown(&inner, entry).await;
            } else {
                debug!(id = entry.id, retry = entry.retry_count, "re-queued after backoff");
                queue.push_front(entry);
                drop(queue);
                inner.work_notify.notify_one();
            }
        }
    }
}

/// Resolve everything still queued with ShuttingDown
async fn drain_and_reject(inner: &Inner) {
    let entries = {
        let mut queue = inner.queue.lock().await;
        queue.drain()
    };
    if entries.is_empty() {
        return;
    }
    info!(rejected = entries.len(), "draining queue at shutdown");
    for entry in entries {
        reject_at_shutdown(inner, entry).await;
    }
}

async fn reject_at_shutdown(inner: &Inner, entry: QueuedRequest) {
    debug!(id = entry.id, service = %entry.request.service, "rejected at shutdown");
    // Fresh requests were simply never attempted; only ones with failure
    // history leave a dead-letter record.
    if let Some(first_failed_at) = entry.first_failed_at {
        inner.dead_letters.lock().await.push(DeadLetterEntry {
            request_id: entry.id,
            service: entry.request.service.clone(),
            endpoint: entry.request.endpoint.clone(),
            failure_reason: FailureReason::ShutdownRejected,
            last_error: ApiError::ShuttingDown.to_string(),
            first_failed_at,
            last_failed_at: SystemTime::now(),
        });
    }
    entry.respond(Err(ApiError::ShuttingDown));
}
