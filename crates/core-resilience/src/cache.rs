//! TTL + size-bounded response cache
//!
//! A keyed store where every entry carries its own time-to-live and the
//! whole map is capped at a maximum entry count. Expired entries are
//! removed lazily when read; size pressure evicts the least-recently-read
//! entry (LRU by last access).

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// A single cached value with its freshness bookkeeping
#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    written_at: Instant,
    ttl: Duration,
    last_access: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            written_at: now,
            ttl,
            last_access: now,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.written_at) > self.ttl
    }
}

/// Hit/miss counters shared across clones of a cache
#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    evictions: AtomicU64,
}

/// Snapshot of cache activity
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    /// Reads that returned a live entry
    pub hits: u64,
    /// Reads that found nothing usable (absent or expired)
    pub misses: u64,
    /// Entries dropped because their TTL had elapsed
    pub expirations: u64,
    /// Entries dropped by LRU size pressure
    pub evictions: u64,
    /// Live entries at snapshot time
    pub len: usize,
    /// Configured entry budget (0 = unbounded)
    pub max_size: usize,
}

impl CacheStats {
    /// Fraction of reads served from cache, 0.0 when no reads yet
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// TTL-bounded key/value cache with LRU-by-last-access eviction
///
/// Cheap to clone; clones share the same entries and counters.
///
/// # Example
/// ```
/// use rotunda_core_resilience::cache::TtlCache;
/// use std::time::Duration;
///
/// # async fn example() {
/// let cache: TtlCache<String, u64> = TtlCache::new(100, Duration::from_secs(60));
///
/// cache.set("bills:recent".to_string(), 42).await;
/// assert_eq!(cache.get(&"bills:recent".to_string()).await, Some(42));
/// # }
/// ```
#[derive(Debug)]
pub struct TtlCache<K, V> {
    max_size: usize,
    default_ttl: Duration,
    entries: Arc<Mutex<HashMap<K, CacheEntry<V>>>>,
    counters: Arc<CacheCounters>,
}

impl<K, V> Clone for TtlCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            max_size: self.max_size,
            default_ttl: self.default_ttl,
            entries: Arc::clone(&self.entries),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache holding at most `max_size` entries (0 = unbounded),
    /// each living `default_ttl` unless overridden per entry
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            max_size,
            default_ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
            counters: Arc::new(CacheCounters::default()),
        }
    }

    /// Look up a key, refreshing its LRU stamp on a hit
    ///
    /// An expired entry is deleted here and reported as a miss.
    pub async fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        match entries.get_mut(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                self.counters.expirations.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(entry) => {
                entry.last_access = now;
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or overwrite a key with the default TTL
    pub async fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, self.default_ttl).await;
    }

    /// Insert or overwrite a key with an explicit TTL
    ///
    /// When the insert pushes the cache over budget, expired entries are
    /// swept first, then the least-recently-accessed live entries go.
    pub async fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.insert(key, CacheEntry::new(value, ttl));

        if self.max_size == 0 || entries.len() <= self.max_size {
            return;
        }

        // Sweep dead entries before sacrificing live ones
        let expired: Vec<K> = entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for k in expired {
            entries.remove(&k);
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
        }

        while entries.len() > self.max_size {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    entries.remove(&k);
                    self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }
    }

    /// Remove a key, returning its value if it was present and live
    pub async fn remove(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries
            .remove(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value)
    }

    /// Drop every entry
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    /// Number of entries currently held, expired ones included
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// True when the cache holds nothing
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Activity snapshot
    pub async fn stats(&self) -> CacheStats {
        let len = self.entries.lock().await.len();
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            len,
            max_size: self.max_size,
        }
    }
}
