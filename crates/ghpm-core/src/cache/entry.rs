//! Cache entry bookkeeping.

use std::time::Duration;

use tokio::time::Instant;

/// A stored value plus the metadata eviction policies rank by.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub expires_at: Instant,
    pub access_count: u64,
    pub last_accessed: Instant,
    /// Monotonic insertion counter (FIFO order)
    pub inserted_seq: u64,
    pub size_bytes: usize,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, ttl: Duration, inserted_seq: u64, size_bytes: usize) -> Self {
        let now = Instant::now();
        Self {
            value,
            expires_at: now + ttl,
            access_count: 0,
            last_accessed: now,
            inserted_seq,
            size_bytes,
        }
    }

    /// Expired once the clock is strictly past `expires_at`.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now > self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Record a read.
    pub fn touch(&mut self) {
        self.access_count += 1;
        self.last_accessed = Instant::now();
    }

    pub fn remaining_ttl(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_expiry_is_strict() {
        let entry = CacheEntry::new("v", Duration::from_millis(100), 0, 1);

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(!entry.is_expired());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(entry.is_expired());
        assert_eq!(entry.remaining_ttl(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch() {
        let mut entry = CacheEntry::new(1u32, Duration::from_secs(60), 7, 1);
        let created = entry.last_accessed;

        tokio::time::advance(Duration::from_secs(5)).await;
        entry.touch();
        entry.touch();

        assert_eq!(entry.access_count, 2);
        assert!(entry.last_accessed > created);
        assert_eq!(entry.inserted_seq, 7);
    }
}
