use dashmap::DashMap;
use serde::Serialize;
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Cache entry with its own TTL
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            created_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }
}

/// Concurrent string-keyed map whose entries expire after a TTL.
///
/// Expired entries are dropped lazily by [`TtlCache::get`] and in bulk by
/// [`TtlCache::cleanup_expired`]. There is no capacity limit.
#[derive(Debug)]
pub struct TtlCache<V> {
    name: &'static str,
    data: DashMap<String, CacheEntry<V>>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, default_ttl: Duration) -> Self {
        Self {
            name,
            data: DashMap::new(),
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Returns a clone of the live value and counts a hit, or counts a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();

        if let Some(entry) = self.data.get(key) {
            if !entry.is_expired(now) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            drop(entry);
            self.data.remove_if(key, |_, e| e.is_expired(now));
            debug!("⏰ [{}] Expired entry removed: {}", self.name, key);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Checks for a live entry without touching the hit/miss counters.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.data.get(key).is_some_and(|e| !e.is_expired(now))
    }

    pub fn set(&self, key: impl Into<String>, value: V) -> Option<V> {
        self.set_with_ttl(key, value, self.default_ttl)
    }

    /// Replaces any previous entry wholesale.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) -> Option<V> {
        self.data
            .insert(key.into(), CacheEntry::new(value, ttl))
            .map(|old| old.value)
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.data.remove(key).map(|(_, entry)| entry.value)
    }

    /// Number of stored entries, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn flush(&self) {
        self.data.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Removes expired entries and returns how many were dropped
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.data.len();
        self.data.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.data.len());

        if removed > 0 {
            info!("🧹 [{}] Cache cleanup: removed {} expired entries", self.name, removed);
        }

        removed
    }

    /// Starts a background sweep that stops on `shutdown` or once the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(cache) = cache.upgrade() else { break };
                        cache.cleanup_expired();
                    }
                }
            }
            debug!("Cache sweeper stopped");
        })
    }
}

impl<V> TtlCache<V>
where
    V: Clone + Serialize + Send + Sync + 'static,
{
    /// Hit/miss counters and approximate serialized sizes, for diagnostics only.
    pub fn stats(&self) -> CacheStats {
        let (key_bytes, value_bytes) = self.data.iter().fold((0, 0), |(k, v), entry| {
            let size = serde_json::to_vec(&entry.value().value)
                .map(|bytes| bytes.len())
                .unwrap_or(0);
            (k + entry.key().len(), v + size)
        });

        CacheStats {
            name: self.name,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            keys: self.data.len(),
            key_bytes,
            value_bytes,
        }
    }
}

/// Read-only cache statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub name: &'static str,
    pub hits: u64,
    pub misses: u64,
    pub keys: usize,
    pub key_bytes: usize,
    pub value_bytes: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} hits, {} misses, {} keys ({:.1}% hit rate)\n  \
             key size {:.2} KB, value size {:.2} KB",
            self.name,
            self.hits,
            self.misses,
            self.keys,
            self.hit_rate() * 100.0,
            self.key_bytes as f64 / 1024.0,
            self.value_bytes as f64 / 1024.0
        )
    }
}
