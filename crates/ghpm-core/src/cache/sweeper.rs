//! Background expiry sweep.

use std::sync::PoisonError;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::store::SharedCache;

/// Shortest interval the sweeper runs at.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Spawn a task that deletes expired entries every `interval`.
///
/// Keys that are never read again would otherwise stay resident until
/// evicted. Intervals below [`MIN_SWEEP_INTERVAL`] are raised to it. Abort
/// the returned handle on shutdown.
pub fn spawn_sweeper<V>(cache: SharedCache<V>, interval: Duration) -> JoinHandle<()>
where
    V: Clone + Serialize + Send + 'static,
{
    if interval < MIN_SWEEP_INTERVAL {
        warn!(
            requested_ms = interval.as_millis() as u64,
            min_ms = MIN_SWEEP_INTERVAL.as_millis() as u64,
            "Cache sweep interval too short, using minimum"
        );
    }
    let interval = interval.max(MIN_SWEEP_INTERVAL);

    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "Starting cache sweeper");

        let mut ticker = tokio::time::interval(interval);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let removed = cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .cleanup_expired();

            if removed > 0 {
                debug!(removed, "Cache sweep removed expired entries");
            }
        }
    })
}
