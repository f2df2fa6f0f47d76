//! Core traits, types, and error handling for ghpm-tools.
//!
//! This crate provides the foundational abstractions used across all ghpm
//! components: the provider traits implemented by the GitHub plugin, the
//! generic TTL cache, and the rate-limit tracker shared by every API call.

pub mod cache;
pub mod config;
pub mod error;
pub mod provider;
pub mod rate_limit;
pub mod types;

pub use cache::{CacheConfig, CacheStats, EvictionPolicy, SharedCache, TtlCache};
pub use config::{ApiConfig, BatchConfig, Config, GitHubConfig};
pub use error::{Error, Result};
pub use provider::{IssueProvider, MilestoneProvider, ProjectProvider, Provider};
pub use rate_limit::{ApiSurface, RateLimitSnapshot, RateLimitTracker};
pub use types::*;
