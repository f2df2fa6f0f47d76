//! GitHub quota tracking.
//!
//! Holds the most recently observed rate-limit state per API surface. The
//! tracker is a passive state holder: it never retries anything itself, the
//! request executor consults it between attempts.

use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// `remaining` below this counts as approaching the limit.
pub const DEFAULT_LIMIT_THRESHOLD: u64 = 100;

/// Extra wait after `reset_at`; GitHub reports resets with second granularity.
const RESET_GRACE: Duration = Duration::from_secs(1);

/// GitHub API surface with an independent quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiSurface {
    Core,
    Search,
    Graphql,
}

impl ApiSurface {
    /// Parse the value of the `x-ratelimit-resource` header.
    pub fn from_resource(resource: &str) -> Option<Self> {
        match resource {
            "core" => Some(ApiSurface::Core),
            "search" => Some(ApiSurface::Search),
            "graphql" => Some(ApiSurface::Graphql),
            _ => None,
        }
    }

    /// Surface a REST path is billed against.
    pub fn for_rest_path(path: &str) -> Self {
        if path.starts_with("/search/") {
            ApiSurface::Search
        } else {
            ApiSurface::Core
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiSurface::Core => "core",
            ApiSurface::Search => "search",
            ApiSurface::Graphql => "graphql",
        }
    }
}

impl fmt::Display for ApiSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quota state observed in a single response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
    pub used: u64,
}

impl RateLimitSnapshot {
    /// Build a snapshot from REST headers.
    ///
    /// `lookup` returns the value of a (lowercase) header name. Returns the
    /// surface named by `x-ratelimit-resource` when GitHub sent one.
    pub fn from_headers<'a>(
        lookup: impl Fn(&str) -> Option<&'a str>,
    ) -> Option<(Option<ApiSurface>, Self)> {
        let number = |name: &str| lookup(name).and_then(|v| v.trim().parse::<u64>().ok());

        let limit = number("x-ratelimit-limit")?;
        let remaining = number("x-ratelimit-remaining")?;
        let reset = number("x-ratelimit-reset")?;
        let used = number("x-ratelimit-used").unwrap_or(limit.saturating_sub(remaining));
        let reset_at = Utc.timestamp_opt(i64::try_from(reset).ok()?, 0).single()?;
        let surface = lookup("x-ratelimit-resource").and_then(ApiSurface::from_resource);

        Some((
            surface,
            Self {
                limit,
                remaining,
                reset_at,
                used,
            },
        ))
    }

    /// Build a snapshot from a GraphQL response body.
    ///
    /// Reads `extensions.rateLimit`, falling back to a `rateLimit` field
    /// selected in `data`.
    pub fn from_graphql(body: &serde_json::Value) -> Option<Self> {
        let node = body
            .pointer("/extensions/rateLimit")
            .or_else(|| body.pointer("/data/rateLimit"))?;

        let limit = node.get("limit")?.as_u64()?;
        let remaining = node.get("remaining")?.as_u64()?;
        let reset_at = node
            .get("resetAt")?
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())?
            .with_timezone(&Utc);
        let used = node
            .get("used")
            .and_then(|v| v.as_u64())
            .unwrap_or(limit.saturating_sub(remaining));

        Some(Self {
            limit,
            remaining,
            reset_at,
            used,
        })
    }

    /// Time left until the quota resets, if the reset is in the future.
    pub fn time_until_reset(&self) -> Option<Duration> {
        (self.reset_at - Utc::now()).to_std().ok()
    }
}

/// Last-known quota per surface.
#[derive(Debug, Default)]
pub struct RateLimitTracker {
    snapshots: RwLock<HashMap<ApiSurface, RateLimitSnapshot>>,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot for a surface.
    pub fn record(&self, surface: ApiSurface, snapshot: RateLimitSnapshot) {
        debug!(
            surface = %surface,
            remaining = snapshot.remaining,
            limit = snapshot.limit,
            "Rate limit observed"
        );
        self.snapshots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(surface, snapshot);
    }

    pub fn snapshot(&self, surface: ApiSurface) -> Option<RateLimitSnapshot> {
        self.snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&surface)
            .cloned()
    }

    /// All known snapshots, ordered by surface name.
    pub fn snapshots(&self) -> Vec<(ApiSurface, RateLimitSnapshot)> {
        let mut all: Vec<_> = self
            .snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(surface, snapshot)| (*surface, snapshot.clone()))
            .collect();
        all.sort_by_key(|(surface, _)| surface.as_str());
        all
    }

    /// `true` when fewer than `threshold` calls remain on the surface.
    pub fn is_approaching_limit(&self, surface: ApiSurface, threshold: u64) -> bool {
        self.snapshot(surface)
            .is_some_and(|s| s.remaining < threshold)
    }

    /// How long `wait_until_reset` would sleep right now.
    pub fn reset_delay(&self, surface: ApiSurface) -> Option<Duration> {
        self.snapshot(surface)
            .and_then(|s| s.time_until_reset())
            .map(|d| d + RESET_GRACE)
    }

    /// Suspend until the surface's quota resets.
    ///
    /// Returns immediately when nothing is known about the surface or the
    /// reset time already passed.
    pub async fn wait_until_reset(&self, surface: ApiSurface) {
        let Some(delay) = self.reset_delay(surface) else {
            return;
        };
        info!(surface = %surface, wait_ms = delay.as_millis() as u64, "Waiting for rate limit reset");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn snapshot(remaining: u64, reset_in: chrono::Duration) -> RateLimitSnapshot {
        RateLimitSnapshot {
            limit: 5000,
            remaining,
            reset_at: Utc::now() + reset_in,
            used: 5000 - remaining,
        }
    }

    #[test]
    fn test_from_headers() {
        let headers: HashMap<&str, &str> = HashMap::from([
            ("x-ratelimit-limit", "5000"),
            ("x-ratelimit-remaining", "4990"),
            ("x-ratelimit-reset", "1700000000"),
            ("x-ratelimit-used", "10"),
            ("x-ratelimit-resource", "search"),
        ]);

        let (surface, snap) =
            RateLimitSnapshot::from_headers(|name| headers.get(name).copied()).unwrap();
        assert_eq!(surface, Some(ApiSurface::Search));
        assert_eq!(snap.limit, 5000);
        assert_eq!(snap.remaining, 4990);
        assert_eq!(snap.used, 10);
        assert_eq!(snap.reset_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_from_headers_missing() {
        let headers: HashMap<&str, &str> = HashMap::from([("x-ratelimit-limit", "5000")]);
        assert!(RateLimitSnapshot::from_headers(|name| headers.get(name).copied()).is_none());
    }

    #[test]
    fn test_from_graphql_extensions() {
        let body = serde_json::json!({
            "data": {},
            "extensions": {
                "rateLimit": {
                    "limit": 5000,
                    "remaining": 4321,
                    "resetAt": "2024-01-01T00:00:00Z",
                    "cost": 1
                }
            }
        });
        let snap = RateLimitSnapshot::from_graphql(&body).unwrap();
        assert_eq!(snap.remaining, 4321);
        assert_eq!(snap.used, 679);
        assert_eq!(snap.reset_at.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_from_graphql_data_field() {
        let body = serde_json::json!({
            "data": {
                "rateLimit": {"limit": 100, "remaining": 1, "resetAt": "2030-01-01T00:00:00Z", "used": 99}
            }
        });
        let snap = RateLimitSnapshot::from_graphql(&body).unwrap();
        assert_eq!(snap.used, 99);
        assert!(RateLimitSnapshot::from_graphql(&serde_json::json!({"data": {}})).is_none());
    }

    #[test]
    fn test_surface_for_path() {
        assert_eq!(ApiSurface::for_rest_path("/search/issues"), ApiSurface::Search);
        assert_eq!(ApiSurface::for_rest_path("/repos/o/r/issues"), ApiSurface::Core);
    }

    #[test]
    fn test_record_overwrites() {
        let tracker = RateLimitTracker::new();
        tracker.record(ApiSurface::Core, snapshot(10, chrono::Duration::minutes(5)));
        tracker.record(ApiSurface::Core, snapshot(4000, chrono::Duration::minutes(5)));

        assert_eq!(tracker.snapshot(ApiSurface::Core).unwrap().remaining, 4000);
        assert!(tracker.snapshot(ApiSurface::Graphql).is_none());
        assert_eq!(tracker.snapshots().len(), 1);
    }

    #[test]
    fn test_is_approaching_limit() {
        let tracker = RateLimitTracker::new();
        assert!(!tracker.is_approaching_limit(ApiSurface::Core, DEFAULT_LIMIT_THRESHOLD));

        tracker.record(ApiSurface::Core, snapshot(99, chrono::Duration::minutes(1)));
        assert!(tracker.is_approaching_limit(ApiSurface::Core, DEFAULT_LIMIT_THRESHOLD));
        assert!(!tracker.is_approaching_limit(ApiSurface::Core, 99));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_reset_waits_full_window() {
        let tracker = RateLimitTracker::new();
        tracker.record(ApiSurface::Core, snapshot(0, chrono::Duration::milliseconds(5000)));

        let start = tokio::time::Instant::now();
        tracker.wait_until_reset(ApiSurface::Core).await;
        assert!(start.elapsed() >= Duration::from_millis(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_reset_returns_immediately() {
        let tracker = RateLimitTracker::new();

        let start = tokio::time::Instant::now();
        tracker.wait_until_reset(ApiSurface::Search).await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        tracker.record(ApiSurface::Search, snapshot(0, chrono::Duration::seconds(-30)));
        tracker.wait_until_reset(ApiSurface::Search).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
