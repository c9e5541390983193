//! Result Cache
//!
//! Plain-mode results keyed by a hash of the whitespace-normalized SQL. Reads go
//! straight to the concurrent map; insertion and eviction are serialized by a mutex.
//! Entries expire after the TTL and the least recently used entry is evicted once
//! the capacity is exceeded.

use crate::config::CacheConfig;
use crate::execution::result::ExecutionResult;
use crate::sql::normalize_whitespace;
use dashmap::DashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

pub type CacheKey = u64;

/// Key for a statement: identical up to whitespace means identical key
pub fn cache_key(sql: &str) -> CacheKey {
    let mut hasher = DefaultHasher::new();
    normalize_whitespace(sql).hash(&mut hasher);
    hasher.finish()
}

struct CacheEntry {
    result: ExecutionResult,
    inserted_at: Instant,
    last_access: AtomicU64,
}

pub struct ResultCache {
    entries: DashMap<CacheKey, CacheEntry>,
    ttl: Duration,
    capacity: usize,
    clock: AtomicU64,
    write_lock: Mutex<()>,
}

impl ResultCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            capacity,
            clock: AtomicU64::new(0),
            write_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(Duration::from_secs(config.ttl_secs), config.capacity)
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        entry.inserted_at.elapsed() >= self.ttl
    }

    pub fn get(&self, key: CacheKey) -> Option<ExecutionResult> {
        let expired = match self.entries.get(&key) {
            None => return None,
            Some(entry) if !self.is_expired(&entry) => {
                entry.last_access.store(self.tick(), Ordering::Relaxed);
                return Some(entry.result.clone());
            }
            Some(_) => true,
        };
        if expired {
            self.entries.remove_if(&key, |_, entry| self.is_expired(entry));
            debug!("Cache entry {:x} expired", key);
        }
        None
    }

    pub fn put(&self, key: CacheKey, result: ExecutionResult) {
        if self.capacity == 0 || self.ttl.is_zero() {
            return;
        }
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        self.entries.insert(
            key,
            CacheEntry {
                result,
                inserted_at: Instant::now(),
                last_access: AtomicU64::new(self.tick()),
            },
        );

        if self.entries.len() > self.capacity {
            self.entries.retain(|_, entry| !self.is_expired(entry));
        }
        while self.entries.len() > self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.value().last_access.load(Ordering::Relaxed))
                .map(|entry| *entry.key());
            match oldest {
                Some(victim) => {
                    self.entries.remove(&victim);
                    debug!("Cache evicted entry {:x}", victim);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(tag: i64) -> ExecutionResult {
        ExecutionResult::new("SELECT 1", vec!["v".to_string()], vec![vec![json!(tag)]])
    }

    #[test]
    fn test_key_ignores_whitespace_but_not_case() {
        assert_eq!(
            cache_key("SELECT  *\n FROM t;"),
            cache_key("SELECT * FROM t")
        );
        assert_ne!(cache_key("SELECT * FROM t"), cache_key("select * from t"));
        assert_ne!(cache_key("SELECT 'a  b'"), cache_key("SELECT 'a b'"));
    }

    #[test]
    fn test_round_trip_until_ttl() {
        let cache = ResultCache::new(Duration::from_millis(40), 10);
        let key = cache_key("SELECT 1");
        cache.put(key, result(1));
        assert_eq!(cache.get(key), Some(result(1)));

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.get(key), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_eviction() {
        let cache = ResultCache::new(Duration::from_secs(60), 2);
        cache.put(1, result(1));
        cache.put(2, result(2));
        // Touch 1 so 2 becomes least recently used
        assert!(cache.get(1).is_some());
        cache.put(3, result(3));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(1).is_some());
        assert!(cache.get(2).is_none());
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let cache = ResultCache::new(Duration::from_secs(60), 0);
        cache.put(1, result(1));
        assert!(cache.get(1).is_none());
    }

    #[test]
    fn test_concurrent_access() {
        let cache = std::sync::Arc::new(ResultCache::new(Duration::from_secs(60), 8));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..50u64 {
                        cache.put(t * 100 + i, result(i as i64));
                        let _ = cache.get(t * 100 + i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.len() <= 8);
    }
}
