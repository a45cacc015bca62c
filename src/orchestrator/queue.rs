/*!
 * Priority queue for pending requests
 *
 * Ordering is (priority descending, arrival ascending): higher priorities
 * dispatch first, equal priorities dispatch in FIFO order. Re-queued
 * requests go to the head of their own priority class, never ahead of a
 * higher class.
 */

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::time::{Instant, SystemTime};

use tokio::sync::oneshot;

use crate::error::ApiError;
use crate::transport::{ApiRequest, ApiResponse};

/// Composite ordering key: priority first (reversed, so higher dispatches
/// earlier), then a sequence number. Forward arrivals get positive,
/// increasing sequences; head re-queues get negative, decreasing ones.
pub type QueueKey = (Reverse<i32>, i64);

/// One request waiting for dispatch
#[derive(Debug)]
pub struct QueuedRequest {
    /// Orchestrator-assigned id, used for priority adjustment
    pub id: u64,

    pub request: ApiRequest,

    pub priority: i32,

    pub enqueued_at: Instant,

    /// Times this request has been re-queued after a retryable failure
    pub retry_count: u32,

    /// Set on the first failed dispatch, for dead-letter bookkeeping
    pub first_failed_at: Option<SystemTime>,

    responder: oneshot::Sender<Result<ApiResponse, ApiError>>,
}

impl QueuedRequest {
    pub fn new(
        id: u64,
        request: ApiRequest,
        priority: i32,
        responder: oneshot::Sender<Result<ApiResponse, ApiError>>,
    ) -> Self {
        Self {
            id,
            request,
            priority,
            enqueued_at: Instant::now(),
            retry_count: 0,
            first_failed_at: None,
            responder,
        }
    }

    /// Deliver the final outcome to whoever is awaiting this request.
    /// A dropped receiver is not an error; the caller simply stopped waiting.
    pub fn respond(self, result: Result<ApiResponse, ApiError>) {
        let _ = self.responder.send(result);
    }
}

/// Priority-ordered pending queue with by-id lookup
#[derive(Debug, Default)]
pub struct PendingQueue {
    entries: BTreeMap<QueueKey, QueuedRequest>,
    index: HashMap<u64, QueueKey>,
    next_seq: i64,
    front_seq: i64,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append behind everything already waiting at the same priority.
    pub fn push_back(&mut self, entry: QueuedRequest) {
        self.next_seq += 1;
        let key = (Reverse(entry.priority), self.next_seq);
        self.index.insert(entry.id, key);
        self.entries.insert(key, entry);
    }

    /// Insert ahead of everything waiting at the same priority.
    ///
    /// Used for re-queued failures: they have already waited a full turn,
    /// so they go back to the head of their class, but still behind any
    /// higher-priority work.
    pub fn push_front(&mut self, entry: QueuedRequest) {
        self.front_seq -= 1;
        let key = (Reverse(entry.priority), self.front_seq);
        self.index.insert(entry.id, key);
        self.entries.insert(key, entry);
    }

    /// Move a waiting request to a different priority class.
    ///
    /// The request keeps its sequence number, so inside the new class it
    /// sorts by original arrival order. Returns false when the id is not
    /// waiting (already dispatched or never queued).
    pub fn adjust_priority(&mut self, id: u64, new_priority: i32) -> bool {
        let Some(old_key) = self.index.get(&id).copied() else {
            return false;
        };
        let Some(mut entry) = self.entries.remove(&old_key) else {
            return false;
        };
        entry.priority = new_priority;
        let new_key = (Reverse(new_priority), old_key.1);
        self.index.insert(id, new_key);
        self.entries.insert(new_key, entry);
        true
    }

    /// Remove and return the highest-ranked request.
    pub fn pop_next(&mut self) -> Option<QueuedRequest> {
        let (_, entry) = self.entries.pop_first()?;
        self.index.remove(&entry.id);
        Some(entry)
    }

    /// Iterate waiting requests in dispatch order without removing them.
    pub fn iter(&self) -> impl Iterator<Item = (&QueueKey, &QueuedRequest)> {
        self.entries.iter()
    }

    /// Remove a specific request found during an `iter` scan.
    pub fn take(&mut self, key: &QueueKey) -> Option<QueuedRequest> {
        let entry = self.entries.remove(key)?;
        self.index.remove(&entry.id);
        Some(entry)
    }

    /// Remove everything, in dispatch order.
    pub fn drain(&mut self) -> Vec<QueuedRequest> {
        self.index.clear();
        let entries = std::mem::take(&mut self.entries);
        entries.into_values().collect()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.index.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Waiting request count per service, for stats snapshots.
    pub fn service_depths(&self) -> HashMap<String, usize> {
        let mut depths: HashMap<String, usize> = HashMap::new();
        for entry in self.entries.values() {
            *depths.entry(entry.request.service.clone()).or_default() += 1;
        }
        depths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(id: u64, priority: i32) -> QueuedRequest {
        let (tx, _rx) = oneshot::channel();
        QueuedRequest::new(
            id,
            ApiRequest::get("congress", format!("/bills/{}", id)),
            priority,
            tx,
        )
    }

    fn queued_for(id: u64, service: &str, priority: i32) -> QueuedRequest {
        let (tx, _rx) = oneshot::channel();
        QueuedRequest::new(id, ApiRequest::get(service, "/x"), priority, tx)
    }

    #[test]
    fn test_higher_priority_pops_first_fifo_within_class() {
        let mut queue = PendingQueue::new();
        queue.push_back(queued(1, 5));
        queue.push_back(queued(2, 1));
        queue.push_back(queued(3, 9));
        queue.push_back(queued(4, 5));

        let order: Vec<u64> = std::iter::from_fn(|| queue.pop_next().map(|e| e.id)).collect();
        assert_eq!(order, vec![3, 1, 4, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_push_front_jumps_its_class_only() {
        let mut queue = PendingQueue::new();
        queue.push_back(queued(1, 5));
        queue.push_back(queued(2, 5));
        queue.push_back(queued(3, 9));

        // Re-queued entry goes to the head of priority 5, not past priority 9
        queue.push_front(queued(4, 5));

        let order: Vec<u64> = std::iter::from_fn(|| queue.pop_next().map(|e| e.id)).collect();
        assert_eq!(order, vec![3, 4, 1, 2]);
    }

    #[test]
    fn test_adjust_priority_moves_between_classes() {
        let mut queue = PendingQueue::new();
        queue.push_back(queued(1, 5));
        queue.push_back(queued(2, 1));

        assert!(queue.adjust_priority(2, 10));

        let first = queue.pop_next().unwrap();
        assert_eq!(first.id, 2);
        assert_eq!(first.priority, 10);
        assert_eq!(queue.pop_next().unwrap().id, 1);
    }

    #[test]
    fn test_adjust_priority_keeps_arrival_order_in_new_class() {
        let mut queue = PendingQueue::new();
        queue.push_back(queued(1, 5));
        queue.push_back(queued(2, 5));
        queue.push_back(queued(3, 1));

        // 3 arrives last, so even after promotion it sits behind 1 and 2
        assert!(queue.adjust_priority(3, 5));

        let order: Vec<u64> = std::iter::from_fn(|| queue.pop_next().map(|e| e.id)).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn test_adjust_priority_unknown_id() {
        let mut queue = PendingQueue::new();
        queue.push_back(queued(1, 5));
        assert!(!queue.adjust_priority(99, 10));
    }

    #[test]
    fn test_take_removes_mid_queue() {
        let mut queue = PendingQueue::new();
        queue.push_back(queued(1, 5));
        queue.push_back(queued(2, 3));
        queue.push_back(queued(3, 1));

        let key = *queue
            .iter()
            .find(|(_, e)| e.id == 2)
            .map(|(k, _)| k)
            .unwrap();
        let taken = queue.take(&key).unwrap();
        assert_eq!(taken.id, 2);
        assert!(!queue.contains(2));

        let order: Vec<u64> = std::iter::from_fn(|| queue.pop_next().map(|e| e.id)).collect();
        assert_eq!(order, vec![1, 3]);
    }

    #[test]
    fn test_drain_returns_dispatch_order() {
        let mut queue = PendingQueue::new();
        queue.push_back(queued(1, 1));
        queue.push_back(queued(2, 9));
        queue.push_back(queued(3, 5));

        let drained: Vec<u64> = queue.drain().into_iter().map(|e| e.id).collect();
        assert_eq!(drained, vec![2, 3, 1]);
        assert!(queue.is_empty());
        assert!(!queue.contains(2));
    }

    #[test]
    fn test_service_depths() {
        let mut queue = PendingQueue::new();
        queue.push_back(queued_for(1, "congress", 5));
        queue.push_back(queued_for(2, "congress", 1));
        queue.push_back(queued_for(3, "openstates", 5));

        let depths = queue.service_depths();
        assert_eq!(depths.get("congress"), Some(&2));
        assert_eq!(depths.get("openstates"), Some(&1));
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_responder_delivers_result() {
        let (tx, rx) = oneshot::channel();
        let entry = QueuedRequest::new(7, ApiRequest::get("congress", "/bills"), 5, tx);

        entry.respond(Err(ApiError::ShuttingDown));

        let received = rx.blocking_recv().unwrap();
        assert!(matches!(received, Err(ApiError::ShuttingDown)));
    }

    #[test]
    fn test_respond_to_dropped_receiver_is_quiet() {
        let (tx, rx) = oneshot::channel();
        let entry = QueuedRequest::new(8, ApiRequest::get("congress", "/bills"), 5, tx);
        drop(rx);
        // Must not panic
        entry.respond(Err(ApiError::ShuttingDown));
    }
}
