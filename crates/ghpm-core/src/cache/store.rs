//! Cache storage engine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::entry::CacheEntry;
use super::pattern::glob_match;
use super::stats::{CacheStats, Counters};
use super::{CacheConfig, EvictionPolicy, FALLBACK_ENTRY_SIZE};

/// Cache handle shared between the accessor and the background sweeper.
pub type SharedCache<V> = Arc<Mutex<TtlCache<V>>>;

/// Bounded key-value store with per-entry expiry.
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: HashMap<String, CacheEntry<V>>,
    config: CacheConfig,
    counters: Counters,
    memory_bytes: usize,
    next_seq: u64,
}

impl<V: Clone + Serialize> TtlCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: HashMap::new(),
            config,
            counters: Counters::default(),
            memory_bytes: 0,
            next_seq: 0,
        }
    }

    /// Wrap a new cache for sharing across tasks.
    pub fn shared(config: CacheConfig) -> SharedCache<V> {
        Arc::new(Mutex::new(Self::new(config)))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.config.eviction_policy
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a live value.
    ///
    /// An expired entry is dropped and reported as a miss.
    pub fn get(&mut self, key: &str) -> Option<V> {
        self.get_with(key, |value| Some(value.clone()))
    }

    /// Look up a live value and convert it in one step.
    ///
    /// A value `decode` rejects is dropped and counted as a miss.
    pub fn get_with<T>(&mut self, key: &str, decode: impl FnOnce(&V) -> Option<T>) -> Option<T> {
        let now = Instant::now();

        let Some(entry) = self.entries.get_mut(key) else {
            self.counters.misses += 1;
            return None;
        };

        if entry.is_expired_at(now) {
            self.remove_entry(key);
            self.counters.expirations += 1;
            self.counters.misses += 1;
            return None;
        }

        match decode(&entry.value) {
            Some(decoded) => {
                entry.touch();
                self.counters.hits += 1;
                Some(decoded)
            }
            None => {
                self.remove_entry(key);
                self.counters.misses += 1;
                None
            }
        }
    }

    /// Whether a live entry exists, without touching statistics.
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired())
    }

    /// Store with the configured default TTL.
    pub fn set_default(&mut self, key: impl Into<String>, value: V) {
        let ttl = self.config.default_ttl();
        self.set(key, value, ttl);
    }

    /// Store a value, evicting first if the budgets require it.
    ///
    /// Values larger than the whole memory budget are not cached, and
    /// nothing is cached when `max_entries` is zero.
    pub fn set(&mut self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        if self.config.max_entries == 0 {
            debug!(key = %key, "Cache has no entry budget, not caching");
            return;
        }

        let size = estimate_size(&key, &value);

        if size > self.config.max_memory_bytes {
            warn!(
                key = %key,
                size,
                budget = self.config.max_memory_bytes,
                "Value exceeds cache memory budget, not caching"
            );
            return;
        }

        // an overwrite frees its old slot before budgets are checked
        self.remove_entry(&key);
        self.make_room(size);

        let seq = self.next_seq;
        self.next_seq += 1;

        self.memory_bytes += size;
        self.entries
            .insert(key, CacheEntry::new(value, ttl, seq, size));
        self.counters.sets += 1;
    }

    /// Remove one key. Returns whether it existed.
    pub fn delete(&mut self, key: &str) -> bool {
        let removed = self.remove_entry(key).is_some();
        if removed {
            self.counters.deletes += 1;
        }
        removed
    }

    /// Remove every key matching a `*` wildcard pattern.
    pub fn invalidate(&mut self, pattern: &str) -> usize {
        let keys: Vec<String> = self
            .entries
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();

        for key in &keys {
            self.remove_entry(key);
        }
        self.counters.deletes += keys.len() as u64;

        if !keys.is_empty() {
            debug!(pattern, removed = keys.len(), "Cache invalidated");
        }
        keys.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.memory_bytes = 0;
    }

    /// Drop every expired entry.
    pub fn cleanup_expired(&mut self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove_entry(key);
        }
        self.counters.expirations += expired.len() as u64;
        expired.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.counters
            .snapshot(self.memory_bytes, self.entries.len())
    }

    fn remove_entry(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.memory_bytes = self.memory_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    /// Evict in policy order until one more entry of `incoming` bytes fits.
    fn make_room(&mut self, incoming: usize) {
        let over_count = |cache: &Self| cache.entries.len() >= cache.config.max_entries;
        let over_memory =
            |cache: &Self| cache.memory_bytes + incoming > cache.config.max_memory_bytes;

        if !over_count(self) && !over_memory(self) {
            return;
        }

        let policy = self.config.eviction_policy;
        let mut victims: Vec<(&String, &CacheEntry<V>)> = self.entries.iter().collect();
        victims.sort_by(|(_, a), (_, b)| policy.compare(a, b));
        let victims: Vec<String> = victims.into_iter().map(|(key, _)| key.clone()).collect();

        let mut evicted = 0usize;
        for key in victims {
            if !over_count(self) && !over_memory(self) {
                break;
            }
            self.remove_entry(&key);
            evicted += 1;
        }

        self.counters.evictions += evicted as u64;
        debug!(evicted, policy = ?policy, "Cache evicted entries");
    }
}

/// Serialized length of key and value; a fixed fallback if serialization fails.
fn estimate_size<V: Serialize>(key: &str, value: &V) -> usize {
    match serde_json::to_vec(value) {
        Ok(bytes) => key.len() + bytes.len(),
        Err(e) => {
            warn!(key, error = %e, "Cache size estimation failed, using fallback size");
            key.len() + FALLBACK_ENTRY_SIZE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn config(max_entries: usize, policy: EvictionPolicy) -> CacheConfig {
        CacheConfig {
            max_entries,
            eviction_policy: policy,
            ..Default::default()
        }
    }

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn test_set_then_expire() {
        let mut cache: TtlCache<Value> = TtlCache::new(CacheConfig::default());

        cache.set("project:1", json!({"title": "A"}), Duration::from_millis(1000));
        assert_eq!(cache.get("project:1"), Some(json!({"title": "A"})));

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert_eq!(cache.get("project:1"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.total_keys, 0);
        assert_eq!(stats.total_memory_bytes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_never_returned_without_sweep() {
        let mut cache: TtlCache<u32> = TtlCache::new(CacheConfig::default());
        for i in 0..10 {
            cache.set(format!("k{}", i), i, Duration::from_millis(10 * (i as u64 + 1)));
        }

        tokio::time::advance(Duration::from_millis(55)).await;
        for i in 0..10u32 {
            let expected = if i >= 5 { Some(i) } else { None };
            assert_eq!(cache.get(&format!("k{}", i)), expected, "key k{}", i);
        }
    }

    #[test]
    fn test_overwrite_does_not_duplicate() {
        let mut cache: TtlCache<Value> = TtlCache::new(CacheConfig::default());

        cache.set("issue:1", json!({"n": 1}), MINUTE);
        let first = cache.stats();
        cache.set("issue:1", json!({"n": 1}), MINUTE);
        let second = cache.stats();

        assert_eq!(first.total_keys, 1);
        assert_eq!(second.total_keys, 1);
        assert_eq!(first.total_memory_bytes, second.total_memory_bytes);
        assert_eq!(second.sets, 2);
    }

    #[test]
    fn test_invalidate_prefix() {
        let mut cache: TtlCache<u32> = TtlCache::new(CacheConfig::default());
        cache.set("issue:1", 1, MINUTE);
        cache.set("issue:2", 2, MINUTE);
        cache.set("issues:list", 3, MINUTE);
        cache.set("project:issue:1", 4, MINUTE);

        assert_eq!(cache.invalidate("issue:*"), 2);
        assert!(!cache.contains("issue:1"));
        assert!(!cache.contains("issue:2"));
        assert!(cache.contains("issues:list"));
        assert!(cache.contains("project:issue:1"));
        assert_eq!(cache.stats().deletes, 2);
    }

    #[test]
    fn test_delete_and_clear() {
        let mut cache: TtlCache<u32> = TtlCache::new(CacheConfig::default());
        cache.set("a", 1, MINUTE);
        cache.set("b", 2, MINUTE);

        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        assert_eq!(cache.get("a"), None);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().total_memory_bytes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_evicts_least_recently_read() {
        let mut cache: TtlCache<u32> = TtlCache::new(config(3, EvictionPolicy::Lru));
        cache.set("a", 1, MINUTE);
        tokio::time::advance(Duration::from_millis(1)).await;
        cache.set("b", 2, MINUTE);
        tokio::time::advance(Duration::from_millis(1)).await;
        cache.set("c", 3, MINUTE);
        tokio::time::advance(Duration::from_millis(1)).await;

        // "a" becomes the most recently read
        assert_eq!(cache.get("a"), Some(1));
        tokio::time::advance(Duration::from_millis(1)).await;

        cache.set("d", 4, MINUTE);

        assert_eq!(cache.len(), 3);
        assert!(!cache.contains("b"));
        assert!(cache.contains("a"));
        assert!(cache.contains("c"));
        assert!(cache.contains("d"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lfu_evicts_least_frequently_read() {
        let mut cache: TtlCache<u32> = TtlCache::new(config(3, EvictionPolicy::Lfu));
        cache.set("a", 1, MINUTE);
        cache.set("b", 2, MINUTE);
        cache.set("c", 3, MINUTE);

        for _ in 0..3 {
            cache.get("a");
            cache.get("c");
        }
        cache.get("b");

        cache.set("d", 4, MINUTE);

        assert!(!cache.contains("b"));
        assert!(cache.contains("a"));
        assert!(cache.contains("c"));
        assert!(cache.contains("d"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_evicts_oldest_insert() {
        let mut cache: TtlCache<u32> = TtlCache::new(config(2, EvictionPolicy::Fifo));
        cache.set("first", 1, MINUTE);
        cache.set("second", 2, MINUTE);
        for _ in 0..5 {
            cache.get("first");
        }

        cache.set("third", 3, MINUTE);

        assert!(!cache.contains("first"));
        assert!(cache.contains("second"));
        assert!(cache.contains("third"));
    }

    #[test]
    fn test_entry_bound_holds_after_many_sets() {
        let mut cache: TtlCache<u64> = TtlCache::new(config(10, EvictionPolicy::Lru));
        for i in 0..500u64 {
            cache.set(format!("key:{}", i), i, MINUTE);
            assert!(cache.stats().total_keys <= 10);
        }
        // one eviction per insert beyond capacity, never more
        assert_eq!(cache.stats().evictions, 490);
    }

    #[test]
    fn test_memory_bound_holds_after_many_sets() {
        let budget = 2_000;
        let mut cache: TtlCache<Value> = TtlCache::new(CacheConfig {
            max_memory_bytes: budget,
            ..Default::default()
        });

        for i in 0..200 {
            cache.set(
                format!("blob:{}", i),
                json!({"payload": "x".repeat(i % 50)}),
                MINUTE,
            );
            assert!(cache.stats().total_memory_bytes <= budget);
        }
        assert!(cache.len() > 1);
    }

    #[test]
    fn test_zero_entry_budget_caches_nothing() {
        let mut cache = TtlCache::new(CacheConfig {
            max_entries: 0,
            ..CacheConfig::default()
        });
        cache.set("a", 1u32, Duration::from_secs(60));
        cache.set_default("b", 2u32);

        let stats = cache.stats();
        assert_eq!(stats.total_keys, 0);
        assert_eq!(stats.sets, 0);
        assert_eq!(stats.evictions, 0);
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn test_oversized_value_skipped() {
        let mut cache: TtlCache<String> = TtlCache::new(CacheConfig {
            max_memory_bytes: 64,
            ..Default::default()
        });
        cache.set("small", "ok".to_string(), MINUTE);
        cache.set("huge", "y".repeat(1000), MINUTE);

        assert!(cache.contains("small"));
        assert!(!cache.contains("huge"));
        assert_eq!(cache.stats().sets, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_expired() {
        let mut cache: TtlCache<u32> = TtlCache::new(CacheConfig::default());
        cache.set("short", 1, Duration::from_millis(10));
        cache.set("long", 2, MINUTE);

        tokio::time::advance(Duration::from_millis(20)).await;

        assert_eq!(cache.cleanup_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("long"));
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_get_with_rejected_value_is_a_miss() {
        let mut cache: TtlCache<Value> = TtlCache::new(CacheConfig::default());
        cache.set("issue:1", json!({"number": "not a number"}), MINUTE);

        let decoded = cache.get_with("issue:1", |v| v["number"].as_u64());
        assert_eq!(decoded, None);
        assert!(!cache.contains("issue:1"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_set_default_uses_configured_ttl() {
        let mut cache: TtlCache<u32> = TtlCache::new(CacheConfig {
            default_ttl_ms: 1234,
            ..Default::default()
        });
        cache.set_default("k", 1);
        assert!(cache.contains("k"));
        assert_eq!(cache.config().default_ttl(), Duration::from_millis(1234));
    }
}
