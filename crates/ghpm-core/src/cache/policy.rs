//! Eviction policies.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::entry::CacheEntry;

/// Which entries go first when the cache must shrink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least recently read
    #[default]
    Lru,
    /// Least frequently read; ties fall back to recency
    Lfu,
    /// Oldest inserted
    Fifo,
}

impl EvictionPolicy {
    /// Order two entries so that the better eviction victim sorts first.
    pub fn compare<V>(&self, a: &CacheEntry<V>, b: &CacheEntry<V>) -> Ordering {
        match self {
            EvictionPolicy::Lru => a
                .last_accessed
                .cmp(&b.last_accessed)
                .then(a.inserted_seq.cmp(&b.inserted_seq)),
            EvictionPolicy::Lfu => a
                .access_count
                .cmp(&b.access_count)
                .then(a.last_accessed.cmp(&b.last_accessed))
                .then(a.inserted_seq.cmp(&b.inserted_seq)),
            EvictionPolicy::Fifo => a.inserted_seq.cmp(&b.inserted_seq),
        }
    }
}

impl std::str::FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            "fifo" => Ok(EvictionPolicy::Fifo),
            other => Err(format!("unknown eviction policy '{}'", other)),
        }
    }
}
