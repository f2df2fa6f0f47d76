//! Read-through caching and pagination helpers.
//!
//! Responses are cached as `serde_json::Value` so one cache instance serves
//! every resource type. Keys are derived from the request that produced them;
//! writes invalidate by key pattern.

use std::future::Future;
use std::sync::PoisonError;
use std::time::Duration;

use ghpm_core::{CacheConfig, Page, Result, SharedCache};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::transport::ApiRequest;

/// Largest page size GitHub accepts.
pub const MAX_PER_PAGE: u32 = 100;

// =============================================================================
// Keys and TTL classes
// =============================================================================

/// Cache key for a REST read: `rest:{METHOD}:{path}?{sorted query}`.
pub fn rest_key(method: &Method, path: &str, query: &[(String, String)]) -> String {
    let mut pairs: Vec<String> = query.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    pairs.sort();
    format!("rest:{}:{}?{}", method, path, pairs.join("&"))
}

pub fn request_key(request: &ApiRequest) -> String {
    rest_key(&request.method, &request.path, &request.query)
}

/// Cache key for a named GraphQL read: `graphql:{name}:{variables}`.
///
/// Object keys are sorted so equal variables always produce the same key.
pub fn graphql_key(name: &str, variables: &Value) -> String {
    format!("graphql:{}:{}", name, normalize(variables))
}

fn normalize(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", Value::String(k.clone()), normalize(&map[k])))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(normalize).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}

/// How long a kind of response stays fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlClass {
    List,
    Entity,
    Search,
}

impl TtlClass {
    pub fn ttl(self, config: &CacheConfig) -> Duration {
        match self {
            TtlClass::List => config.list_ttl(),
            TtlClass::Entity => config.entity_ttl(),
            TtlClass::Search => config.search_ttl(),
        }
    }
}

// =============================================================================
// Read-through wrapper
// =============================================================================

/// Return the cached value under `key`, or run `fetch` and cache its result.
///
/// Errors from `fetch` are returned as-is and never cached. A cached value
/// that no longer decodes as `T` is dropped and refetched.
pub async fn cached<T, F, Fut>(
    cache: &SharedCache<Value>,
    key: &str,
    ttl: Duration,
    fetch: F,
) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let hit = cache
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get_with(key, |value| match serde_json::from_value::<T>(value.clone()) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(key, error = %e, "Cached value no longer decodes, refetching");
                None
            }
        });

    if let Some(value) = hit {
        debug!(key, "Cache hit");
        return Ok(value);
    }

    debug!(key, "Cache miss");
    let fresh = fetch().await?;

    match serde_json::to_value(&fresh) {
        Ok(value) => cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set(key, value, ttl),
        Err(e) => warn!(key, error = %e, "Response not cacheable, skipping cache"),
    }

    Ok(fresh)
}

/// Drop every cached key matching each pattern.
pub fn invalidate(cache: &SharedCache<Value>, patterns: &[String]) -> usize {
    let mut guard = cache.lock().unwrap_or_else(PoisonError::into_inner);
    patterns.iter().map(|p| guard.invalidate(p)).sum()
}

// =============================================================================
// Pagination
// =============================================================================

/// Fetch pages `1..=max_pages` until a page comes back short.
///
/// `has_next_page` is set only when the page cap ended the loop.
pub async fn paginate<T, F, Fut>(per_page: u32, max_pages: u32, mut fetch_page: F) -> Result<Page<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let per_page = per_page.clamp(1, MAX_PER_PAGE) as usize;
    let max_pages = max_pages.max(1);

    let mut items = Vec::new();
    for page in 1..=max_pages {
        let batch = fetch_page(page).await?;
        let short = batch.len() < per_page;
        items.extend(batch);
        if short {
            return Ok(Page {
                items,
                has_next_page: false,
            });
        }
    }

    Ok(Page {
        items,
        has_next_page: true,
    })
}
