//! Error types for ghpm-tools.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::rate_limit::RateLimitSnapshot;

/// Main error type for ghpm operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection-level failure (DNS, reset, TLS)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Request exceeded its timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Bad or missing credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Resource does not exist (or is hidden from the token)
    #[error("Not found: {0}")]
    NotFound(String),

    /// API returned an error
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// GraphQL response carried an `errors` list
    #[error("GraphQL error: {}", .0.join("; "))]
    GraphQl(Vec<String>),

    /// Quota exhausted and the retry budget is spent
    #[error("Rate limit exceeded for {endpoint} after {attempts} attempt(s){}", format_reset(.snapshot))]
    RateLimited {
        endpoint: String,
        attempts: u32,
        snapshot: Option<RateLimitSnapshot>,
        retry_after: Option<Duration>,
    },

    /// Transient failures on every attempt
    #[error("Request to {endpoint} failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        endpoint: String,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    /// Combined GraphQL request of a batch failed
    #[error("Batched request of {batch_size} queries failed: {cause}")]
    BatchFailed {
        batch_size: usize,
        #[source]
        cause: Arc<Error>,
    },

    /// Client was shut down while the request was queued
    #[error("Client destroyed before the request was sent")]
    ClientDestroyed,

    /// Response or input could not be interpreted
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Generic error
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

fn format_reset(snapshot: &Option<RateLimitSnapshot>) -> String {
    match snapshot {
        Some(s) => format!(
            " ({}/{} remaining, resets at {})",
            s.remaining,
            s.limit,
            s.reset_at.to_rfc3339()
        ),
        None => String::new(),
    }
}

impl Error {
    /// Map a non-success HTTP status to an error.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => Error::Unauthorized(message),
            404 => Error::NotFound(message),
            _ => Error::Api { status, message },
        }
    }

    /// Machine-readable error code surfaced to tool callers.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Http(_) => "http",
            Error::Timeout(_) => "timeout",
            Error::Unauthorized(_) => "unauthorized",
            Error::NotFound(_) => "not_found",
            Error::Api { .. } => "api_error",
            Error::GraphQl(_) => "graphql_error",
            Error::RateLimited { .. } => "rate_limited",
            Error::RetriesExhausted { .. } => "retries_exhausted",
            Error::BatchFailed { .. } => "batch_failed",
            Error::ClientDestroyed => "client_destroyed",
            Error::InvalidData(_) => "invalid_data",
            Error::Serialization(_) => "serialization",
            Error::Config(_) => "config",
            Error::Storage(_) => "storage",
            Error::Other(_) => "internal",
        }
    }

    /// Whether a single failed attempt with this error may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(_) | Error::Timeout(_) => true,
            Error::Api { status, .. } => matches!(status, 500 | 502 | 503 | 504),
            _ => false,
        }
    }
}

/// Result type alias for ghpm operations.
pub type Result<T> = std::result::Result<T, Error>;
