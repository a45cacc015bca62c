//! Dead-letter queue: bounded record of permanently-failed requests
//!
//! When a request exhausts its retry budget and every recovery path, it is
//! recorded here instead of disappearing with its error. Operators can
//! inspect or drain the entries; the queue itself never blocks the caller
//! path.
//!
//! # Example
//!
//! ```
//! use rotunda_core_resilience::dead_letter::{DeadLetterQueue, DeadLetterEntry, FailureReason};
//!
//! let mut dlq = DeadLetterQueue::new(1000);
//!
//! dlq.push(DeadLetterEntry {
//!     request_id: 42,
//!     service: "openstates".to_string(),
//!     endpoint: "/bills/recent".to_string(),
//!     failure_reason: FailureReason::RetriesExhausted { attempts: 3 },
//!     last_error: "connection refused".to_string(),
//!     first_failed_at: std::time::SystemTime::now(),
//!     last_failed_at: std::time::SystemTime::now(),
//! });
//!
//! assert_eq!(dlq.len(), 1);
//! let entries = dlq.drain();
//! assert_eq!(entries.len(), 1);
//! ```

use std::collections::VecDeque;
use std::time::SystemTime;

/// Why a request ended up dead-lettered
#[derive(Debug, Clone)]
pub enum FailureReason {
    /// Re-queue budget spent without a success
    RetriesExhausted { attempts: u32 },

    /// Every matching fallback handler also failed
    FallbacksExhausted,

    /// Error class that retrying cannot fix
    NonRetryable,

    /// Rejected while awaiting a retry slot during shutdown
    ShutdownRejected,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::RetriesExhausted { attempts } => {
                write!(f, "retries exhausted after {} attempts", attempts)
            }
            FailureReason::FallbacksExhausted => write!(f, "fallbacks exhausted"),
            FailureReason::NonRetryable => write!(f, "non-retryable error"),
            FailureReason::ShutdownRejected => write!(f, "rejected at shutdown"),
        }
    }
}

/// A single dead-letter entry
#[derive(Debug, Clone)]
pub struct DeadLetterEntry {
    /// Queue id of the failed request
    pub request_id: u64,

    /// Service the request was bound for
    pub service: String,

    /// Endpoint path of the failed request
    pub endpoint: String,

    /// Why this request was dead-lettered
    pub failure_reason: FailureReason,

    /// Last error message observed
    pub last_error: String,

    /// When this request first failed
    pub first_failed_at: SystemTime,

    /// When this request last failed
    pub last_failed_at: SystemTime,
}

/// In-memory dead-letter queue with bounded capacity.
///
/// Entries past capacity drop oldest-first so memory stays bounded no
/// matter how badly an upstream misbehaves.
#[derive(Debug)]
pub struct DeadLetterQueue {
    entries: VecDeque<DeadLetterEntry>,
    max_capacity: usize,
    total_received: u64,
    total_dropped: u64,
}

impl DeadLetterQueue {
    /// Create a new dead-letter queue with the given maximum capacity
    pub fn new(max_capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_capacity.min(1024)),
            max_capacity,
            total_received: 0,
            total_dropped: 0,
        }
    }

    /// Push an entry, dropping the oldest one if at capacity
    pub fn push(&mut self, entry: DeadLetterEntry) {
        self.total_received += 1;

        if self.entries.len() >= self.max_capacity {
            self.entries.pop_front();
            self.total_dropped += 1;
        }

        self.entries.push_back(entry);
    }

    /// Remove and return every entry
    pub fn drain(&mut self) -> Vec<DeadLetterEntry> {
        self.entries.drain(..).collect()
    }

    /// Peek at all entries without removing them
    pub fn entries(&self) -> &VecDeque<DeadLetterEntry> {
        &self.entries
    }

    /// Entries recorded against one service
    pub fn entries_for_service(&self, service: &str) -> Vec<&DeadLetterEntry> {
        self.entries
            .iter()
            .filter(|e| e.service == service)
            .collect()
    }

    /// Number of entries currently held
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Counter snapshot
    pub fn stats(&self) -> DeadLetterStats {
        DeadLetterStats {
            current_count: self.entries.len(),
            max_capacity: self.max_capacity,
            total_received: self.total_received,
            total_dropped: self.total_dropped,
        }
    }
}

/// Statistics for the dead-letter queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterStats {
    /// Current number of entries
    pub current_count: usize,
    /// Maximum capacity
    pub max_capacity: usize,
    /// Total entries ever received
    pub total_received: u64,
    /// Total entries dropped due to capacity overflow
    pub total_dropped: u64,
}
