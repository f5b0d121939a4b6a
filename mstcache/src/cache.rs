//! Bounded in-memory cache with TTL and FIFO eviction
//!
//! Entries expire `ttl` after insertion and are purged lazily, on the
//! access or insertion that observes them expired, never by a background
//! sweep. When the bound would be exceeded, the oldest-inserted live entry
//! is evicted first, irrespective of access recency. Replacing a key counts
//! as a fresh insertion.
//!
//! All operations take one lock for their whole critical section, so
//! `get`/`put`/`clear` are mutually atomic and linearizable. The lock is
//! never held across an await point (nothing here is async).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

struct CacheInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// Insertion order, oldest at the front. Kept in sync with `entries`.
    order: VecDeque<String>,
}

/// Bounded, time-expiring key→value store
pub struct ResolutionCache<V> {
    inner: Mutex<CacheInner<V>>,
    ttl: Duration,
    max_entries: usize,
}

impl<V: Clone> ResolutionCache<V> {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            ttl,
            max_entries,
        }
    }

    /// Look up a key. Expired entries count as absent and are removed.
    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    /// Insert or replace. Evicts the oldest-inserted live entry when the
    /// bound would be exceeded.
    pub fn put(&self, key: impl Into<String>, value: V) {
        self.put_at(key.into(), value, Instant::now());
    }

    /// Empty the cache, returning how many entries were dropped.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        let count = inner.entries.len();
        inner.entries.clear();
        inner.order.clear();
        count
    }

    /// Number of live (non-expired) entries.
    pub fn len(&self) -> usize {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        Self::purge_expired(&mut inner, Instant::now(), self.ttl);
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// `get` against an explicit clock, so expiry is testable without
    /// sleeping.
    pub fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let mut inner = self.inner.lock().expect("cache lock poisoned");

        let expired = match inner.entries.get(key) {
            None => return None,
            Some(entry) => now.duration_since(entry.inserted_at) > self.ttl,
        };

        if expired {
            inner.entries.remove(key);
            inner.order.retain(|k| k != key);
            return None;
        }

        inner.entries.get(key).map(|e| e.value.clone())
    }

    /// `put` against an explicit clock.
    pub fn put_at(&self, key: String, value: V, now: Instant) {
        // A zero bound means no caching at all, not "one entry over".
        if self.max_entries == 0 {
            return;
        }

        let mut inner = self.inner.lock().expect("cache lock poisoned");

        Self::purge_expired(&mut inner, now, self.ttl);

        // Replacement is a fresh insertion: it moves to the back of the
        // eviction order.
        if inner.entries.remove(&key).is_some() {
            inner.order.retain(|k| k != &key);
        }

        while inner.entries.len() >= self.max_entries {
            match inner.order.pop_front() {
                Some(oldest) => {
                    tracing::debug!("cache full, evicting oldest entry {:?}", oldest);
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }

        inner.order.push_back(key.clone());
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
            },
        );
    }

    fn purge_expired(inner: &mut CacheInner<V>, now: Instant, ttl: Duration) {
        if inner.entries.is_empty() {
            return;
        }
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, entry| now.duration_since(entry.inserted_at) <= ttl);
        if inner.entries.len() < before {
            inner.order.retain(|k| inner.entries.contains_key(k));
            tracing::debug!("purged {} expired cache entries", before - inner.entries.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn cache(max: usize, ttl_secs: u64) -> ResolutionCache<String> {
        ResolutionCache::new(max, Duration::from_secs(ttl_secs))
    }

    #[test]
    fn test_get_put_roundtrip() {
        let c = cache(10, 60);
        assert!(c.get("k").is_none());
        c.put("k", "v".to_string());
        assert_eq!(c.get("k").as_deref(), Some("v"));
    }

    #[test]
    fn test_expiry_is_a_miss_and_purges() {
        let c = cache(10, 60);
        let t0 = Instant::now();
        c.put_at("k".into(), "v".to_string(), t0);

        // Still live just inside the ttl
        assert!(c.get_at("k", t0 + Duration::from_secs(60)).is_some());
        // Unreachable past the ttl
        assert!(c.get_at("k", t0 + Duration::from_secs(61)).is_none());
        // And the expired entry is gone, not lingering
        assert_eq!(c.len(), 0);
    }

    #[test]
    fn test_fifo_eviction_bound() {
        let c = cache(100, 3600);
        let t0 = Instant::now();
        for i in 0..150 {
            c.put_at(format!("k{}", i), format!("v{}", i), t0 + Duration::from_millis(i));
        }
        assert_eq!(c.len(), 100);
        // The 50 oldest were evicted, oldest-first
        for i in 0..50 {
            assert!(c.get_at(&format!("k{}", i), t0 + Duration::from_secs(1)).is_none());
        }
        for i in 50..150 {
            assert!(c.get_at(&format!("k{}", i), t0 + Duration::from_secs(1)).is_some());
        }
    }

    #[test]
    fn test_eviction_ignores_recency() {
        let c = cache(2, 3600);
        let t0 = Instant::now();
        c.put_at("a".into(), "1".to_string(), t0);
        c.put_at("b".into(), "2".to_string(), t0 + Duration::from_millis(1));

        // Touch "a"; FIFO eviction must not care
        assert!(c.get_at("a", t0 + Duration::from_millis(2)).is_some());

        c.put_at("c".into(), "3".to_string(), t0 + Duration::from_millis(3));
        assert!(c.get_at("a", t0 + Duration::from_millis(4)).is_none());
        assert!(c.get_at("b", t0 + Duration::from_millis(4)).is_some());
        assert!(c.get_at("c", t0 + Duration::from_millis(4)).is_some());
    }

    #[test]
    fn test_replace_is_fresh_insertion() {
        let c = cache(2, 3600);
        let t0 = Instant::now();
        c.put_at("a".into(), "1".to_string(), t0);
        c.put_at("b".into(), "2".to_string(), t0 + Duration::from_millis(1));
        // Replace "a": it moves to the back of the eviction order
        c.put_at("a".into(), "1b".to_string(), t0 + Duration::from_millis(2));
        c.put_at("c".into(), "3".to_string(), t0 + Duration::from_millis(3));

        assert!(c.get_at("b", t0 + Duration::from_millis(4)).is_none());
        assert_eq!(
            c.get_at("a", t0 + Duration::from_millis(4)).as_deref(),
            Some("1b")
        );
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let c = cache(0, 60);
        c.put("a", "1".to_string());
        assert!(c.get("a").is_none());
        assert_eq!(c.len(), 0);
    }

    #[test]
    fn test_clear_reports_count() {
        let c = cache(10, 60);
        c.put("a", "1".to_string());
        c.put("b", "2".to_string());
        assert_eq!(c.clear(), 2);
        assert!(c.is_empty());
        assert_eq!(c.clear(), 0);
    }

    #[test]
    fn test_insertion_purges_expired_before_counting() {
        let c = cache(2, 60);
        let t0 = Instant::now();
        c.put_at("a".into(), "1".to_string(), t0);
        c.put_at("b".into(), "2".to_string(), t0);

        // Both expired by now: inserting must not evict anything live
        let later = t0 + Duration::from_secs(120);
        c.put_at("c".into(), "3".to_string(), later);
        assert_eq!(c.get_at("c", later).as_deref(), Some("3"));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_concurrent_operations_hold_size_invariant() {
        let c = Arc::new(cache(100, 3600));
        let mut handles = Vec::new();

        for t in 0..8 {
            let c = Arc::clone(&c);
            handles.push(std::thread::spawn(move || {
                for i in 0..500 {
                    let key = format!("t{}k{}", t, i);
                    c.put(key.clone(), "v".to_string());
                    c.get(&key);
                    if i % 97 == 0 {
                        c.clear();
                    }
                    assert!(c.len() <= 100);
                }
            }));
        }

        for h in handles {
            h.join().expect("worker panicked");
        }
        assert!(c.len() <= 100);
    }
}
