//! Request execution with retry, backoff and quota tracking.

use std::sync::Arc;
use std::time::Duration;

use ghpm_core::{ApiConfig, ApiSurface, Error, RateLimitSnapshot, RateLimitTracker, Result};
use rand::Rng;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::transport::{ApiRequest, ApiResponse, HttpTransport};

/// Exponent cap for the backoff multiplier.
const MAX_BACKOFF_SHIFT: u32 = 16;

// =============================================================================
// Retry policy
// =============================================================================

/// Attempt budget and timing for one logical call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Per-attempt timeout unless the request overrides it
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ApiConfig::default())
    }
}

impl From<&ApiConfig> for RetryPolicy {
    fn from(config: &ApiConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_retry_delay(),
            timeout: config.timeout(),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based), without jitter.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        self.base_delay.saturating_mul(1 << shift)
    }

    /// `base * 2^(attempt-1)` plus jitter drawn uniformly from `[0, base/2]`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let max_jitter = (self.base_delay.as_millis() / 2) as u64;
        let jitter = rand::thread_rng().gen_range(0..=max_jitter);
        self.base_backoff(attempt) + Duration::from_millis(jitter)
    }
}

// =============================================================================
// Executor
// =============================================================================

enum Outcome {
    Done(Value),
    RateLimited { retry_after: Option<Duration> },
    Transient(Error),
    Fatal(Error),
}

/// Sends requests through a transport, retrying what can be retried.
pub struct RequestExecutor {
    transport: Arc<dyn HttpTransport>,
    rate_limits: Arc<RateLimitTracker>,
    policy: RetryPolicy,
}

impl RequestExecutor {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        rate_limits: Arc<RateLimitTracker>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            rate_limits,
            policy,
        }
    }

    pub fn rate_limits(&self) -> &Arc<RateLimitTracker> {
        &self.rate_limits
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute a request and return its JSON body.
    ///
    /// GraphQL responses carrying `errors` are failures even with status 200.
    pub async fn execute(&self, request: ApiRequest) -> Result<Value> {
        self.run(request, false).await
    }

    async fn run(&self, request: ApiRequest, partial: bool) -> Result<Value> {
        let endpoint = request.endpoint();
        let surface = request.surface();
        let timeout = request.timeout.unwrap_or(self.policy.timeout);
        let max_attempts = self.policy.max_retries.max(1);

        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(endpoint = %endpoint, attempt, "Executing request");

            let outcome = match self.transport.send(request.clone(), timeout).await {
                Ok(response) => {
                    self.record_quota(surface, &request, &response);
                    classify(&request, response, partial)
                }
                Err(e) if e.is_retryable() => Outcome::Transient(e),
                Err(e) => Outcome::Fatal(e),
            };

            match outcome {
                Outcome::Done(body) => {
                    if attempt > 1 {
                        debug!(endpoint = %endpoint, attempt, "Request succeeded after retry");
                    }
                    return Ok(body);
                }
                Outcome::Fatal(error) => return Err(error),
                Outcome::Transient(error) => {
                    if attempt >= max_attempts {
                        warn!(endpoint = %endpoint, attempts = attempt, error = %error, "Giving up after transient failures");
                        return Err(Error::RetriesExhausted {
                            endpoint,
                            attempts: attempt,
                            source: Box::new(error),
                        });
                    }
                    let delay = self.policy.backoff_delay(attempt);
                    warn!(
                        endpoint = %endpoint,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Outcome::RateLimited { retry_after } => {
                    if attempt >= max_attempts {
                        return Err(Error::RateLimited {
                            endpoint,
                            attempts: attempt,
                            snapshot: self.rate_limits.snapshot(surface),
                            retry_after,
                        });
                    }
                    self.wait_for_quota(&endpoint, surface, attempt, retry_after)
                        .await;
                }
            }
        }
    }

    /// Execute a GraphQL document and return its `data` object.
    pub async fn execute_graphql(&self, document: &str, variables: Value) -> Result<Value> {
        let body = self
            .execute(ApiRequest::graphql(document, variables))
            .await?;
        graphql_data(body)
    }

    /// Execute a GraphQL document whose top-level fields may be missing.
    ///
    /// `NOT_FOUND` errors that carry a `path` leave the rest of `data` usable,
    /// so they are returned next to it instead of failing the call.
    pub async fn execute_graphql_partial(
        &self,
        document: &str,
        variables: Value,
    ) -> Result<(Value, Vec<FieldError>)> {
        let mut body = self
            .run(ApiRequest::graphql(document, variables), true)
            .await?;
        let missing = body
            .get_mut("errors")
            .map(Value::take)
            .and_then(|errors| serde_json::from_value::<Vec<FieldError>>(errors).ok())
            .unwrap_or_default();
        Ok((graphql_data(body)?, missing))
    }

    async fn wait_for_quota(
        &self,
        endpoint: &str,
        surface: ApiSurface,
        attempt: u32,
        retry_after: Option<Duration>,
    ) {
        if let Some(delay) = retry_after {
            warn!(endpoint, attempt, delay_ms = delay.as_millis() as u64, "Rate limited, honouring Retry-After");
            tokio::time::sleep(delay).await;
        } else if self.rate_limits.reset_delay(surface).is_some() {
            warn!(endpoint, attempt, surface = %surface, "Rate limited, waiting for quota reset");
            self.rate_limits.wait_until_reset(surface).await;
        } else {
            let delay = self.policy.backoff_delay(attempt);
            warn!(endpoint, attempt, delay_ms = delay.as_millis() as u64, "Rate limited, backing off");
            tokio::time::sleep(delay).await;
        }
    }

    fn record_quota(&self, surface: ApiSurface, request: &ApiRequest, response: &ApiResponse) {
        if let Some((reported, snapshot)) = response.rate_limit() {
            self.rate_limits.record(reported.unwrap_or(surface), snapshot);
        }
        if request.is_graphql() {
            if let Some(snapshot) = RateLimitSnapshot::from_graphql(&response.body) {
                self.rate_limits.record(ApiSurface::Graphql, snapshot);
            }
        }
    }
}

/// A GraphQL error scoped to one top-level field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldError {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub path: Vec<Value>,
}

impl FieldError {
    /// Alias or field name the error points at.
    pub fn field(&self) -> Option<&str> {
        self.path.first().and_then(Value::as_str)
    }
}

/// Pull `data` out of a successful GraphQL body.
pub(crate) fn graphql_data(mut body: Value) -> Result<Value> {
    match body.get_mut("data").map(Value::take) {
        Some(data) if !data.is_null() => Ok(data),
        _ => Err(Error::InvalidData(
            "GraphQL response did not contain data".to_string(),
        )),
    }
}

// =============================================================================
// Classification
// =============================================================================

fn classify(request: &ApiRequest, response: ApiResponse, partial: bool) -> Outcome {
    if response.is_success() {
        if request.is_graphql() {
            if let Some(outcome) = classify_graphql_errors(&response, partial) {
                return outcome;
            }
        }
        return Outcome::Done(response.body);
    }

    let message = response.message();
    if is_rate_limit_response(&response, &message) {
        return Outcome::RateLimited {
            retry_after: response.retry_after(),
        };
    }

    let error = Error::from_status(response.status, message);
    if error.is_retryable() {
        Outcome::Transient(error)
    } else {
        Outcome::Fatal(error)
    }
}

fn is_rate_limit_response(response: &ApiResponse, message: &str) -> bool {
    match response.status {
        429 => true,
        403 => {
            message.to_lowercase().contains("rate limit")
                || response.header("x-ratelimit-remaining") == Some("0")
        }
        _ => false,
    }
}

fn classify_graphql_errors(response: &ApiResponse, partial: bool) -> Option<Outcome> {
    let errors = response.body.get("errors")?.as_array()?;
    if errors.is_empty() {
        return None;
    }

    let error_type = |e: &Value| e.get("type").and_then(|t| t.as_str()).map(str::to_string);
    let messages: Vec<String> = errors
        .iter()
        .map(|e| {
            e.get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown GraphQL error")
                .to_string()
        })
        .collect();

    let rate_limited = errors.iter().zip(&messages).any(|(e, message)| {
        error_type(e).as_deref() == Some("RATE_LIMITED")
            || message.to_lowercase().contains("rate limit")
    });
    if rate_limited {
        return Some(Outcome::RateLimited {
            retry_after: response.retry_after(),
        });
    }

    let all_not_found = errors
        .iter()
        .all(|e| error_type(e).as_deref() == Some("NOT_FOUND"));
    let scoped = errors
        .iter()
        .all(|e| e.get("path").and_then(Value::as_array).is_some_and(|p| !p.is_empty()));
    if all_not_found && partial && scoped && response.body["data"].is_object() {
        return None;
    }
    if all_not_found {
        return Some(Outcome::Fatal(Error::NotFound(messages.join("; "))));
    }

    Some(Outcome::Fatal(Error::GraphQl(messages)))
}
