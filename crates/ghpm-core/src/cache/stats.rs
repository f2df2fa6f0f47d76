//! Cache statistics.

use serde::{Deserialize, Serialize};

/// Counter snapshot returned by `TtlCache::stats`.
///
/// `hit_rate`, `total_memory_bytes` and `total_keys` are derived from the live
/// entry set when the snapshot is taken.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub hit_rate: f64,
    pub total_memory_bytes: usize,
    pub total_keys: usize,
}

/// Running counters owned by the cache.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Counters {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl Counters {
    pub fn snapshot(&self, total_memory_bytes: usize, total_keys: usize) -> CacheStats {
        let lookups = self.hits + self.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        };

        CacheStats {
            hits: self.hits,
            misses: self.misses,
            sets: self.sets,
            deletes: self.deletes,
            evictions: self.evictions,
            expirations: self.expirations,
            hit_rate,
            total_memory_bytes,
            total_keys,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_without_lookups() {
        let stats = Counters::default().snapshot(0, 0);
        assert_eq!(stats.hit_rate, 0.0);
    }

    #[test]
    fn test_hit_rate() {
        let counters = Counters {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        let stats = counters.snapshot(128, 2);
        assert!((stats.hit_rate - 0.75).abs() < f64::EPSILON);
        assert_eq!(stats.total_memory_bytes, 128);
        assert_eq!(stats.total_keys, 2);
    }
}
