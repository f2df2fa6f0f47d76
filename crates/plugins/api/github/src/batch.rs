//! GraphQL request batching.
//!
//! Read queries submitted within a short window are merged into one document,
//! each under its own alias (`q0`, `q1`, ...), and the combined response is
//! split back to the callers. Variables are renamed per alias so two queries
//! may both use `$owner` without colliding.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ghpm_core::{BatchConfig, Error, Result};
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::executor::RequestExecutor;

// =============================================================================
// Queries and document building
// =============================================================================

/// A variable used by a query selection.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphQlVariable {
    /// Name without the leading `$`
    pub name: String,
    /// GraphQL type, e.g. `String!`
    pub type_name: String,
    pub value: Value,
}

/// One top-level field selection, e.g.
/// `repositoryOwner(login: $owner) { login }`.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphQlQuery {
    pub selection: String,
    pub variables: Vec<GraphQlVariable>,
}

impl GraphQlQuery {
    pub fn new(selection: impl Into<String>) -> Self {
        Self {
            selection: selection.into(),
            variables: Vec::new(),
        }
    }

    pub fn variable(
        mut self,
        name: impl Into<String>,
        type_name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.variables.push(GraphQlVariable {
            name: name.into(),
            type_name: type_name.into(),
            value: value.into(),
        });
        self
    }
}

/// Alias of the `index`-th query in a batch.
pub fn alias(index: usize) -> String {
    format!("q{}", index)
}

/// Merge queries into one aliased document and its variables object.
pub fn build_document(queries: &[GraphQlQuery]) -> (String, Value) {
    let mut definitions = Vec::new();
    let mut variables = Map::new();
    let mut fields = String::new();

    for (index, query) in queries.iter().enumerate() {
        let alias = alias(index);
        for var in &query.variables {
            let renamed = format!("{}_{}", alias, var.name);
            definitions.push(format!("${}: {}", renamed, var.type_name));
            variables.insert(renamed, var.value.clone());
        }
        fields.push_str(&format!(
            " {}: {}",
            alias,
            rename_variables(&query.selection, &query.variables, &alias)
        ));
    }

    let header = if definitions.is_empty() {
        "query Batch".to_string()
    } else {
        format!("query Batch({})", definitions.join(", "))
    };

    (format!("{} {{{} }}", header, fields), Value::Object(variables))
}

/// Rewrite `$name` references of the query's own variables to `$prefix_name`.
fn rename_variables(selection: &str, variables: &[GraphQlVariable], prefix: &str) -> String {
    let mut out = String::with_capacity(selection.len() + 8 * variables.len());
    let mut chars = selection.chars().peekable();

    while let Some(c) = chars.next() {
        out.push(c);
        if c != '$' {
            continue;
        }

        let mut ident = String::new();
        while let Some(&next) = chars.peek() {
            if next.is_ascii_alphanumeric() || next == '_' {
                ident.push(next);
                chars.next();
            } else {
                break;
            }
        }

        if variables.iter().any(|v| v.name == ident) {
            out.push_str(prefix);
            out.push('_');
        }
        out.push_str(&ident);
    }
    out
}

// =============================================================================
// Batcher
// =============================================================================

/// Lifecycle of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    Idle,
    /// Window timer running
    Accumulating,
    /// Combined request in flight
    Flushing,
}

struct Pending {
    query: GraphQlQuery,
    responder: oneshot::Sender<Result<Value>>,
}

struct BatchState {
    queue: VecDeque<Pending>,
    phase: BatchPhase,
    timer: Option<JoinHandle<()>>,
    /// Id of the current window; a timer only flushes the window it was armed for
    window: u64,
    closed: bool,
}

struct Inner {
    executor: Arc<RequestExecutor>,
    config: BatchConfig,
    state: Mutex<BatchState>,
}

/// Queue that merges concurrent GraphQL reads.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct GraphQlBatcher {
    inner: Arc<Inner>,
}

impl GraphQlBatcher {
    pub fn new(executor: Arc<RequestExecutor>, config: BatchConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                executor,
                config,
                state: Mutex::new(BatchState {
                    queue: VecDeque::new(),
                    phase: BatchPhase::Idle,
                    timer: None,
                    window: 0,
                    closed: false,
                }),
            }),
        }
    }

    pub fn phase(&self) -> BatchPhase {
        self.inner.lock().phase
    }

    /// Queries waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Submit a query and wait for its slice of the combined response.
    pub async fn submit(&self, query: GraphQlQuery) -> Result<Value> {
        if !self.inner.config.enabled {
            return self.execute_single(query).await;
        }

        let (responder, receiver) = oneshot::channel();
        {
            let mut state = self.inner.lock();
            if state.closed {
                return Err(Error::ClientDestroyed);
            }
            state.queue.push_back(Pending { query, responder });

            let full = state.queue.len() >= self.inner.max_batch_size();
            let phase = state.phase;
            match phase {
                BatchPhase::Idle if full => Inner::start_flush(&self.inner, &mut state),
                BatchPhase::Idle => Inner::open_window(&self.inner, &mut state),
                BatchPhase::Accumulating if full => Inner::start_flush(&self.inner, &mut state),
                // picked up when the window ends or the current flush returns
                BatchPhase::Accumulating | BatchPhase::Flushing => {}
            }
        }

        receiver.await.map_err(|_| Error::ClientDestroyed)?
    }

    /// Reject everything queued and refuse new submissions.
    ///
    /// A batch already in flight still delivers its results.
    pub fn shutdown(&self) {
        let (pending, timer) = {
            let mut state = self.inner.lock();
            state.closed = true;
            let pending: Vec<Pending> = state.queue.drain(..).collect();
            (pending, state.timer.take())
        };

        if let Some(timer) = timer {
            timer.abort();
        }
        if !pending.is_empty() {
            info!(rejected = pending.len(), "Batcher shut down with queued queries");
        }
        for item in pending {
            let _ = item.responder.send(Err(Error::ClientDestroyed));
        }
    }

    async fn execute_single(&self, query: GraphQlQuery) -> Result<Value> {
        if self.inner.lock().closed {
            return Err(Error::ClientDestroyed);
        }
        let (document, variables) = build_document(std::slice::from_ref(&query));
        let mut data = self
            .inner
            .executor
            .execute_graphql(&document, variables)
            .await?;
        Ok(take_alias(&mut data, 0))
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, BatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn max_batch_size(&self) -> usize {
        self.config.max_batch_size.max(1)
    }

    /// Enter `Accumulating` with a fresh window timer.
    fn open_window(inner: &Arc<Inner>, state: &mut BatchState) {
        state.window = state.window.wrapping_add(1);
        state.phase = BatchPhase::Accumulating;

        let id = state.window;
        let timer_inner = inner.clone();
        let window = inner.config.window();
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            Inner::window_elapsed(&timer_inner, id);
        }));
    }

    /// Flush window `id` unless it was already flushed or replaced.
    ///
    /// An aborted timer may still get here if it was waiting on the lock.
    fn window_elapsed(inner: &Arc<Inner>, id: u64) {
        let mut state = inner.lock();
        if state.window != id || state.phase != BatchPhase::Accumulating || state.closed {
            return;
        }
        // dropping our own handle detaches rather than cancels
        state.timer.take();
        Inner::start_flush(inner, &mut state);
    }

    /// Move up to `max_batch_size` queued items into a flush task.
    fn start_flush(inner: &Arc<Inner>, state: &mut BatchState) {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }

        let take = state.queue.len().min(inner.max_batch_size());
        let batch: Vec<Pending> = state.queue.drain(..take).collect();
        if batch.is_empty() {
            state.phase = BatchPhase::Idle;
            return;
        }

        state.phase = BatchPhase::Flushing;
        tokio::spawn(Inner::flush(inner.clone(), batch));
    }

    async fn flush(inner: Arc<Inner>, batch: Vec<Pending>) {
        let batch_size = batch.len();
        let (queries, responders): (Vec<_>, Vec<_>) = batch
            .into_iter()
            .map(|p| (p.query, p.responder))
            .unzip();

        let (document, variables) = build_document(&queries);
        debug!(batch_size, "Flushing GraphQL batch");

        match inner
            .executor
            .execute_graphql_partial(&document, variables)
            .await
        {
            Ok((mut data, missing)) => {
                for (index, responder) in responders.into_iter().enumerate() {
                    let alias = alias(index);
                    let result = match missing.iter().find(|e| e.field() == Some(alias.as_str())) {
                        Some(error) => Err(Error::NotFound(error.message.clone())),
                        None => Ok(take_alias(&mut data, index)),
                    };
                    let _ = responder.send(result);
                }
            }
            Err(error) => {
                warn!(batch_size, error = %error, "GraphQL batch failed");
                let cause = Arc::new(error);
                for responder in responders {
                    let _ = responder.send(Err(Error::BatchFailed {
                        batch_size,
                        cause: cause.clone(),
                    }));
                }
            }
        }

        let mut state = inner.lock();
        if state.closed || state.queue.is_empty() {
            state.phase = BatchPhase::Idle;
        } else if state.queue.len() >= inner.max_batch_size() {
            Inner::start_flush(&inner, &mut state);
        } else {
            Inner::open_window(&inner, &mut state);
        }
    }
}

fn take_alias(data: &mut Value, index: usize) -> Value {
    data.get_mut(alias(index))
        .map(Value::take)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::RetryPolicy;
    use crate::transport::{ApiRequest, ApiResponse, MockHttpTransport};
    use ghpm_core::RateLimitTracker;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::Instant;

    fn batcher(transport: MockHttpTransport, config: BatchConfig) -> GraphQlBatcher {
        let executor = RequestExecutor::new(
            Arc::new(transport),
            Arc::new(RateLimitTracker::new()),
            RetryPolicy {
                max_retries: 1,
                base_delay: Duration::from_millis(10),
                timeout: Duration::from_secs(30),
            },
        );
        GraphQlBatcher::new(Arc::new(executor), config)
    }

    fn config(window_ms: u64, max_batch_size: usize) -> BatchConfig {
        BatchConfig {
            enabled: true,
            window_ms,
            max_batch_size,
        }
    }

    /// Answers every alias with the value of its own `$n` variable.
    fn echo_response(request: &ApiRequest) -> ApiResponse {
        let body = request.body.clone().unwrap_or(Value::Null);
        let mut data = Map::new();
        if let Some(vars) = body["variables"].as_object() {
            for (name, value) in vars {
                if let Some(alias) = name.strip_suffix("_n") {
                    data.insert(alias.to_string(), json!({ "echo": value }));
                }
            }
        }
        ApiResponse::new(200, json!({ "data": data }))
    }

    fn echo_query(n: u64) -> GraphQlQuery {
        GraphQlQuery::new("node(id: $n) { id }").variable("n", "ID!", n)
    }

    #[test]
    fn test_build_document_renames_per_alias() {
        let queries = vec![
            GraphQlQuery::new("repositoryOwner(login: $owner) { login }")
                .variable("owner", "String!", "octo"),
            GraphQlQuery::new("repositoryOwner(login: $owner) { login }")
                .variable("owner", "String!", "hubot"),
        ];
        let (document, variables) = build_document(&queries);

        assert_eq!(
            document,
            "query Batch($q0_owner: String!, $q1_owner: String!) { \
             q0: repositoryOwner(login: $q0_owner) { login } \
             q1: repositoryOwner(login: $q1_owner) { login } }"
        );
        assert_eq!(variables, json!({"q0_owner": "octo", "q1_owner": "hubot"}));
    }

    #[test]
    fn test_rename_leaves_prefix_lookalikes() {
        let query = GraphQlQuery::new("f(a: $id, b: $idx, c: $id)").variable("id", "ID!", "x");
        let renamed = rename_variables(&query.selection, &query.variables, "q3");
        assert_eq!(renamed, "f(a: $q3_id, b: $idx, c: $q3_id)");
    }

    #[test]
    fn test_build_document_without_variables() {
        let (document, variables) = build_document(&[GraphQlQuery::new("viewer { login }")]);
        assert_eq!(document, "query Batch { q0: viewer { login } }");
        assert_eq!(variables, json!({}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_match_submission() {
        let mut transport = MockHttpTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|request, _| Ok(echo_response(&request)));

        let b = batcher(transport, config(100, 10));
        let (r0, r1, r2) = tokio::join!(
            b.submit(echo_query(10)),
            b.submit(echo_query(11)),
            b.submit(echo_query(12)),
        );

        assert_eq!(r0.unwrap()["echo"], 10);
        assert_eq!(r1.unwrap()["echo"], 11);
        assert_eq!(r2.unwrap()["echo"], 12);
        assert_eq!(b.phase(), BatchPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_submission_waits_for_window() {
        let mut transport = MockHttpTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|request, _| Ok(echo_response(&request)));

        let b = batcher(transport, config(100, 10));
        let start = Instant::now();
        let value = b.submit(echo_query(1)).await.unwrap();
        assert_eq!(value["echo"], 1);
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_threshold_flushes_immediately() {
        let mut transport = MockHttpTransport::new();
        transport
            .expect_send()
            .times(2)
            .returning(|request, _| Ok(echo_response(&request)));

        let b = batcher(transport, config(10_000, 2));
        let start = Instant::now();
        let (r0, r1) = tokio::join!(b.submit(echo_query(1)), b.submit(echo_query(2)));
        assert_eq!(r0.unwrap()["echo"], 1);
        assert_eq!(r1.unwrap()["echo"], 2);
        assert!(start.elapsed() < Duration::from_millis(10_000));

        // a third query alone has to wait out the window
        let value = b.submit(echo_query(3)).await.unwrap();
        assert_eq!(value["echo"], 3);
        assert!(start.elapsed() >= Duration::from_millis(10_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_is_split_into_batches() {
        let mut transport = MockHttpTransport::new();
        transport
            .expect_send()
            .times(2)
            .returning(|request, _| Ok(echo_response(&request)));

        let b = batcher(transport, config(50, 2));
        let (r0, r1, r2) = tokio::join!(
            b.submit(echo_query(0)),
            b.submit(echo_query(1)),
            b.submit(echo_query(2)),
        );
        assert_eq!(r0.unwrap()["echo"], 0);
        assert_eq!(r1.unwrap()["echo"], 1);
        assert_eq!(r2.unwrap()["echo"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_batch_rejects_every_item() {
        let mut transport = MockHttpTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|_, _| Ok(ApiResponse::new(400, json!({"message": "Problems parsing JSON"}))));

        let b = batcher(transport, config(100, 10));
        let (r0, r1, r2) = tokio::join!(
            b.submit(echo_query(0)),
            b.submit(echo_query(1)),
            b.submit(echo_query(2)),
        );

        let causes: Vec<Arc<Error>> = [r0, r1, r2]
            .into_iter()
            .map(|r| match r.unwrap_err() {
                Error::BatchFailed { batch_size, cause } => {
                    assert_eq!(batch_size, 3);
                    cause
                }
                other => panic!("unexpected error: {other:?}"),
            })
            .collect();

        assert!(matches!(*causes[0], Error::Api { status: 400, .. }));
        assert!(Arc::ptr_eq(&causes[0], &causes[1]));
        assert!(Arc::ptr_eq(&causes[1], &causes[2]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_rejects_queued() {
        let transport = MockHttpTransport::new();
        let b = batcher(transport, config(60_000, 10));

        let queued = {
            let b = b.clone();
            tokio::spawn(async move { b.submit(echo_query(1)).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(b.pending(), 1);
        assert_eq!(b.phase(), BatchPhase::Accumulating);

        b.shutdown();
        assert!(matches!(queued.await.unwrap(), Err(Error::ClientDestroyed)));
        assert!(matches!(
            b.submit(echo_query(2)).await,
            Err(Error::ClientDestroyed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_window_timer_does_not_flush() {
        let mut transport = MockHttpTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|request, _| Ok(echo_response(&request)));

        let b = batcher(transport, config(1_000, 10));
        let queued = {
            let b = b.clone();
            tokio::spawn(async move { b.submit(echo_query(7)).await })
        };
        tokio::task::yield_now().await;
        let current = b.inner.lock().window;

        // a timer from an earlier window firing late is ignored
        Inner::window_elapsed(&b.inner, current.wrapping_sub(1));
        assert_eq!(b.phase(), BatchPhase::Accumulating);
        assert_eq!(b.pending(), 1);

        let start = Instant::now();
        let value = queued.await.unwrap().unwrap();
        assert_eq!(value["echo"], 7);
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_node_fails_only_its_query() {
        let mut transport = MockHttpTransport::new();
        transport.expect_send().times(1).returning(|_, _| {
            Ok(ApiResponse::new(
                200,
                json!({
                    "data": {"q0": {"echo": 0}, "q1": null},
                    "errors": [{
                        "type": "NOT_FOUND",
                        "path": ["q1"],
                        "message": "Could not resolve to a node with the global id of '1'"
                    }]
                }),
            ))
        });

        let b = batcher(transport, config(100, 10));
        let (r0, r1) = tokio::join!(b.submit(echo_query(0)), b.submit(echo_query(1)));

        assert_eq!(r0.unwrap()["echo"], 0);
        let err = r1.unwrap_err();
        assert_eq!(err.code(), "not_found");
        assert!(err.to_string().contains("global id of '1'"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_executes_directly() {
        let mut transport = MockHttpTransport::new();
        transport
            .expect_send()
            .times(2)
            .returning(|request, _| Ok(echo_response(&request)));

        let b = batcher(
            transport,
            BatchConfig {
                enabled: false,
                ..config(100, 10)
            },
        );
        let start = Instant::now();
        let (r0, r1) = tokio::join!(b.submit(echo_query(5)), b.submit(echo_query(6)));
        assert_eq!(r0.unwrap()["echo"], 5);
        assert_eq!(r1.unwrap()["echo"], 6);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
