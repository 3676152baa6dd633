//! In-memory result cache with TTL, half eviction and per-key coalescing.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::time::{Duration, Instant};

/// One cached payload.
#[derive(Debug, Clone)]
pub struct CachedResult<V> {
    pub key: String,
    pub value: V,
    pub created_at: Instant,
    pub expires_at: Instant,
    pub last_accessed: Instant,
    pub access_count: u64,
    /// Tie-breaker for entries touched at the same instant
    access_seq: u64,
}

impl<V> CachedResult<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// Misses that ran the computation (coalesced waiters excluded)
    pub computations: u64,
    pub evictions: u64,
}

struct Entries<V> {
    map: HashMap<String, CachedResult<V>>,
    seq: u64,
}

pub struct ResultCache<V> {
    entries: Mutex<Entries<V>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
    evictions: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<V: Clone> ResultCache<V> {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(Entries {
                map: HashMap::new(),
                seq: 0,
            }),
            locks: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            computations: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up `key`; an expired entry is removed and reported as absent.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = lock(&self.entries);
        entries.seq += 1;
        let seq = entries.seq;

        let expired = match entries.map.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.last_accessed = now;
                entry.access_count += 1;
                entry.access_seq = seq;
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.map.remove(key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert or overwrite `key`.
    pub fn put(&self, key: &str, value: V, ttl: Duration) {
        let now = Instant::now();
        let mut entries = lock(&self.entries);
        entries.seq += 1;
        let access_seq = entries.seq;
        entries.map.insert(
            key.to_string(),
            CachedResult {
                key: key.to_string(),
                value,
                created_at: now,
                expires_at: now + ttl,
                last_accessed: now,
                access_count: 0,
                access_seq,
            },
        );
        if entries.map.len() > self.max_entries {
            let dropped = Self::drop_least_recent_half(&mut entries.map);
            self.evictions.fetch_add(dropped as u64, Ordering::Relaxed);
        }
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        lock(&self.entries).map.remove(key).map(|e| e.value)
    }

    /// Full entry, expired or not, without touching access statistics.
    pub fn peek(&self, key: &str) -> Option<CachedResult<V>> {
        lock(&self.entries).map.get(key).cloned()
    }

    fn drop_least_recent_half(map: &mut HashMap<String, CachedResult<V>>) -> usize {
        let mut by_access: Vec<(u64, String)> =
            map.values().map(|e| (e.access_seq, e.key.clone())).collect();
        by_access.sort_unstable();
        let drop_count = by_access.len() / 2;
        for (_, key) in by_access.into_iter().take(drop_count) {
            map.remove(&key);
        }
        tracing::debug!(dropped = drop_count, remaining = map.len(), "Result cache over ceiling");
        drop_count
    }

    /// Remove every expired entry; returns how many went.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = lock(&self.entries);
        let before = entries.map.len();
        entries.map.retain(|_, e| !e.is_expired(now));
        let removed = before - entries.map.len();
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Return the cached value for `key`, or run `compute` and cache its
    /// success. Concurrent callers missing on the same key wait on one
    /// computation. The flag is true when the value came from the cache.
    pub async fn get_or_compute<F, Fut, E>(&self, key: &str, ttl: Duration, compute: F) -> Result<(V, bool), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok((value, true));
        }

        let key_lock = {
            let mut locks = lock(&self.locks);
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        let result = {
            let _computing = key_lock.lock().await;
            match self.get(key) {
                Some(value) => Ok((value, true)),
                None => {
                    self.computations.fetch_add(1, Ordering::Relaxed);
                    match compute().await {
                        Ok(value) => {
                            self.put(key, value.clone(), ttl);
                            Ok((value, false))
                        }
                        Err(e) => Err(e),
                    }
                }
            }
        };

        drop(key_lock);
        let mut locks = lock(&self.locks);
        if locks.get(key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(key);
        }
        result
    }
}
