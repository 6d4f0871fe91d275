// src/infra/cache.rs — TTL cache for session detail reads
//
// Invalidation is explicit: the feedback pipeline drops a session's entry
// after attaching a report so subsequent reads are never stale. The clock is
// passed in so tests control expiry.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct TtlCache<V: Clone> {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, V)>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some((stored, value)) if now.duration_since(*stored) < self.ttl => {
                Some(value.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: &str, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    pub fn insert_at(&self, key: &str, value: V, now: Instant) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), (now, value));
    }

    pub fn invalidate(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
    }

    /// Drop expired entries. Called from the serve loop alongside limiter
    /// eviction.
    pub fn evict_expired(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, (stored, _)| now.duration_since(*stored) < self.ttl);
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_within_ttl() {
        let cache = TtlCache::new(Duration::from_secs(30));
        let t0 = Instant::now();
        cache.insert_at("s-1", 42u32, t0);
        assert_eq!(cache.get_at("s-1", t0 + Duration::from_secs(29)), Some(42));
    }

    #[test]
    fn test_miss_after_ttl() {
        let cache = TtlCache::new(Duration::from_secs(30));
        let t0 = Instant::now();
        cache.insert_at("s-1", 42u32, t0);
        assert_eq!(cache.get_at("s-1", t0 + Duration::from_secs(31)), None);
    }

    #[test]
    fn test_invalidate() {
        let cache = TtlCache::new(Duration::from_secs(30));
        let t0 = Instant::now();
        cache.insert_at("s-1", "detail".to_string(), t0);
        cache.invalidate("s-1");
        assert_eq!(cache.get_at("s-1", t0), None);
    }

    #[test]
    fn test_evict_expired() {
        let cache = TtlCache::new(Duration::from_secs(10));
        let t0 = Instant::now();
        cache.insert_at("a", 1u8, t0);
        cache.insert_at("b", 2u8, t0 + Duration::from_secs(9));
        assert_eq!(cache.evict_expired(t0 + Duration::from_secs(11)), 1);
        assert_eq!(cache.get_at("b", t0 + Duration::from_secs(11)), Some(2));
    }
}
