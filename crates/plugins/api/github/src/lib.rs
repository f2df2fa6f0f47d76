//! GitHub provider implementation for ghpm-tools.
//!
//! Layers, bottom to top:
//!
//! - [`transport`]: one HTTP exchange, no policy
//! - [`executor`]: retries, backoff and quota bookkeeping
//! - [`batch`]: aliasing of concurrent GraphQL reads into one document
//! - [`cached`]: read-through caching and pagination helpers
//! - [`GitHubClient`]: typed issue, milestone and project operations

pub mod batch;
pub mod cached;
pub mod executor;
pub mod transport;

mod client;
mod types;

pub use batch::{GraphQlBatcher, GraphQlQuery, GraphQlVariable};
pub use client::GitHubClient;
pub use executor::{RequestExecutor, RetryPolicy};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, ReqwestTransport};
pub use types::*;

pub use ghpm_core::config::DEFAULT_GITHUB_URL;
