//! Generic TTL cache with pluggable eviction.
//!
//! Values are opaque to the cache; only their serialized size is inspected to
//! enforce the memory budget.

mod entry;
mod pattern;
mod policy;
mod stats;
mod store;
mod sweeper;

pub use entry::CacheEntry;
pub use pattern::glob_match;
pub use policy::EvictionPolicy;
pub use stats::CacheStats;
pub use store::{SharedCache, TtlCache};
pub use sweeper::{spawn_sweeper, MIN_SWEEP_INTERVAL};

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Size assumed for a value whose serialization fails.
pub const FALLBACK_ENTRY_SIZE: usize = 1024;

/// Cache configuration.
///
/// Durations are kept in milliseconds so the struct maps 1:1 onto the
/// `[cache]` section of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of live entries
    pub max_entries: usize,
    /// TTL used by `set_default`
    pub default_ttl_ms: u64,
    /// Victim selection when a budget is exceeded
    pub eviction_policy: EvictionPolicy,
    /// Upper bound for the summed size estimates of all entries
    pub max_memory_bytes: usize,
    /// Interval of the background expiry sweep
    pub cleanup_interval_ms: u64,
    /// TTL for list endpoints
    pub list_ttl_ms: u64,
    /// TTL for single-entity fetches
    pub entity_ttl_ms: u64,
    /// TTL for search results
    pub search_ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            default_ttl_ms: 5 * 60 * 1000,
            eviction_policy: EvictionPolicy::Lru,
            max_memory_bytes: 50 * 1024 * 1024,
            cleanup_interval_ms: 60 * 1000,
            list_ttl_ms: 2 * 60 * 1000,
            entity_ttl_ms: 5 * 60 * 1000,
            search_ttl_ms: 60 * 1000,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn list_ttl(&self) -> Duration {
        Duration::from_millis(self.list_ttl_ms)
    }

    pub fn entity_ttl(&self) -> Duration {
        Duration::from_millis(self.entity_ttl_ms)
    }

    pub fn search_ttl(&self) -> Duration {
        Duration::from_millis(self.search_ttl_ms)
    }
}
