//! GitHub API client implementation.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use ghpm_core::cache::spawn_sweeper;
use ghpm_core::{
    ApiStatus, ApiSurface, BulkItemResult, BulkOutcome, CacheConfig, Config, CreateIssueInput,
    CreateMilestoneInput, CreateProjectInput, Error, Issue, IssueFilter, IssueProvider,
    IssueSearch, Milestone, MilestoneFilter, MilestoneProvider, Page, Project, ProjectFilter,
    ProjectProvider, Provider, RateLimitSnapshot, RateLimitTracker, Result, SharedCache,
    SurfaceStatus, TtlCache, UpdateIssueInput, UpdateMilestoneInput, UpdateProjectInput,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::batch::{GraphQlBatcher, GraphQlQuery};
use crate::cached::{self, cached, graphql_key, paginate, request_key, TtlClass, MAX_PER_PAGE};
use crate::executor::{RequestExecutor, RetryPolicy};
use crate::transport::{ApiRequest, HttpTransport, ReqwestTransport};
use crate::types::{
    CreateIssueRequest, GitHubIssue, GitHubMilestone, GitHubProjectConnection, GitHubProjectNode,
    GitHubRateLimitResponse, GitHubSearchResult, MilestoneRequest, UpdateIssueRequest,
};

const DEFAULT_PER_PAGE: u32 = 100;
const DEFAULT_MAX_PAGES: u32 = 10;
const DEFAULT_PROJECTS_FIRST: u32 = 20;

/// ProjectV2 fields selected everywhere a project is returned.
const PROJECT_FIELDS: &str = "id number title shortDescription closed url createdAt updatedAt";

/// GitHub API client.
///
/// Owns the whole access stack: transport, retrying executor, GraphQL
/// batcher, response cache and its background sweeper.
pub struct GitHubClient {
    owner: String,
    repo: String,
    executor: Arc<RequestExecutor>,
    batcher: GraphQlBatcher,
    cache: SharedCache<Value>,
    cache_config: CacheConfig,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl GitHubClient {
    /// Create a client for the repository configured in `config`.
    pub fn from_config(config: &Config, token: &str) -> Result<Self> {
        let github = config.repository()?;
        let transport = ReqwestTransport::new(github.base_url(), token, github.user_agent())?;
        Ok(Self::with_transport(
            Arc::new(transport),
            github.owner.clone(),
            github.repo.clone(),
            config,
        ))
    }

    /// Create a client over an arbitrary transport.
    ///
    /// The cache sweeper is only started when called inside a tokio runtime.
    pub fn with_transport(
        transport: Arc<dyn HttpTransport>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        config: &Config,
    ) -> Self {
        let rate_limits = Arc::new(RateLimitTracker::new());
        let executor = Arc::new(RequestExecutor::new(
            transport,
            rate_limits,
            RetryPolicy::from(&config.api),
        ));
        let batcher = GraphQlBatcher::new(executor.clone(), config.batch.clone());
        let cache = TtlCache::shared(config.cache.clone());

        let sweeper = tokio::runtime::Handle::try_current()
            .ok()
            .map(|_| spawn_sweeper(cache.clone(), config.cache.cleanup_interval()));

        Self {
            owner: owner.into(),
            repo: repo.into(),
            executor,
            batcher,
            cache,
            cache_config: config.cache.clone(),
            sweeper: Mutex::new(sweeper),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub fn rate_limits(&self) -> &Arc<RateLimitTracker> {
        self.executor.rate_limits()
    }

    pub fn cache(&self) -> &SharedCache<Value> {
        &self.cache
    }

    /// Fetch `GET /rate_limit` and record every surface it reports.
    ///
    /// This endpoint does not count against the quota.
    pub async fn refresh_rate_limits(&self) -> Result<Vec<SurfaceStatus>> {
        let body = self.executor.execute(ApiRequest::get("/rate_limit")).await?;
        let response: GitHubRateLimitResponse = serde_json::from_value(body)?;

        for (name, resource) in response.resources {
            let Some(surface) = ApiSurface::from_resource(&name) else {
                continue;
            };
            let Some(reset_at) = Utc.timestamp_opt(resource.reset, 0).single() else {
                continue;
            };
            self.rate_limits().record(
                surface,
                RateLimitSnapshot {
                    limit: resource.limit,
                    remaining: resource.remaining,
                    reset_at,
                    used: resource
                        .used
                        .unwrap_or(resource.limit.saturating_sub(resource.remaining)),
                },
            );
        }

        Ok(self.surface_statuses())
    }

    fn surface_statuses(&self) -> Vec<SurfaceStatus> {
        self.rate_limits()
            .snapshots()
            .into_iter()
            .map(|(surface, snapshot)| SurfaceStatus { surface, snapshot })
            .collect()
    }

    // =========================================================================
    // Request helpers
    // =========================================================================

    fn repo_path(&self, suffix: &str) -> String {
        format!("/repos/{}/{}{}", self.owner, self.repo, suffix)
    }

    /// Cached GET decoded into `T`.
    async fn get_json<T>(&self, request: ApiRequest, class: TtlClass) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let key = request_key(&request);
        let ttl = class.ttl(&self.cache_config);
        cached(&self.cache, &key, ttl, || async move {
            let body = self.executor.execute(request).await?;
            Ok(serde_json::from_value(body)?)
        })
        .await
    }

    /// Uncached write; invalidates `patterns` once it succeeded.
    async fn write(&self, request: ApiRequest, patterns: &[String]) -> Result<Value> {
        let endpoint = request.endpoint();
        let body = self.executor.execute(request).await?;
        let removed = cached::invalidate(&self.cache, patterns);
        debug!(endpoint = %endpoint, removed, "Write invalidated cache entries");
        Ok(body)
    }

    fn rest_pattern(&self, suffix: &str) -> String {
        format!("rest:GET:{}*", self.repo_path(suffix))
    }

    /// Issue writes also change search results and milestone counters.
    fn issue_patterns(&self) -> Vec<String> {
        vec![
            self.rest_pattern("/issues"),
            self.rest_pattern("/milestones"),
            "rest:GET:/search/issues*".to_string(),
        ]
    }

    /// Milestone writes also change the milestone embedded in issues.
    fn milestone_patterns(&self) -> Vec<String> {
        vec![
            self.rest_pattern("/milestones"),
            self.rest_pattern("/issues"),
            "rest:GET:/search/issues*".to_string(),
        ]
    }

    fn project_patterns() -> Vec<String> {
        vec!["graphql:project*".to_string()]
    }
}

impl Drop for GitHubClient {
    fn drop(&mut self) {
        if let Some(handle) = self
            .sweeper
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

fn page_size(per_page: Option<u32>) -> u32 {
    per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE)
}

fn check_state(state: &str, allowed: &[&str]) -> Result<()> {
    if allowed.contains(&state) {
        Ok(())
    } else {
        Err(Error::InvalidData(format!(
            "Invalid state '{}', expected one of: {}",
            state,
            allowed.join(", ")
        )))
    }
}

fn require_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(Error::InvalidData("Title must not be empty".to_string()));
    }
    Ok(())
}

fn project_at(data: &Value, pointer: &str) -> Result<Project> {
    let node = data
        .pointer(pointer)
        .filter(|v| !v.is_null())
        .cloned()
        .ok_or_else(|| Error::InvalidData(format!("GraphQL response is missing {}", pointer)))?;
    let node: GitHubProjectNode = serde_json::from_value(node)?;
    Ok(node.into())
}

// =============================================================================
// Issues
// =============================================================================

#[async_trait]
impl IssueProvider for GitHubClient {
    async fn list_issues(&self, filter: IssueFilter) -> Result<Page<Issue>> {
        let state = filter.state.clone().unwrap_or_else(|| "open".to_string());
        check_state(&state, &["open", "closed", "all"])?;

        let per_page = page_size(filter.per_page);
        let max_pages = filter.max_pages.unwrap_or(DEFAULT_MAX_PAGES);
        let path = self.repo_path("/issues");
        let labels = filter.labels.join(",");

        // the stop condition must see pull requests too, so filter afterwards
        let raw = paginate(per_page, max_pages, |page| {
            let mut request = ApiRequest::get(path.clone())
                .with_query("state", &state)
                .with_query("per_page", per_page)
                .with_query("page", page);
            if !labels.is_empty() {
                request = request.with_query("labels", &labels);
            }
            if let Some(assignee) = &filter.assignee {
                request = request.with_query("assignee", assignee);
            }
            if let Some(milestone) = &filter.milestone {
                request = request.with_query("milestone", milestone);
            }
            self.get_json::<Vec<GitHubIssue>>(request, TtlClass::List)
        })
        .await?;

        Ok(Page {
            items: raw
                .items
                .into_iter()
                .filter(|issue| !issue.is_pull_request())
                .map(Issue::from)
                .collect(),
            has_next_page: raw.has_next_page,
        })
    }

    async fn get_issue(&self, number: u64) -> Result<Issue> {
        let request = ApiRequest::get(self.repo_path(&format!("/issues/{}", number)));
        let issue: GitHubIssue = self.get_json(request, TtlClass::Entity).await?;
        Ok(issue.into())
    }

    async fn create_issue(&self, input: CreateIssueInput) -> Result<Issue> {
        require_title(&input.title)?;

        let body = serde_json::to_value(CreateIssueRequest {
            title: input.title,
            body: input.body,
            labels: input.labels,
            assignees: input.assignees,
            milestone: input.milestone,
        })?;
        let created = self
            .write(
                ApiRequest::post(self.repo_path("/issues"), body),
                &self.issue_patterns(),
            )
            .await?;

        let issue: GitHubIssue = serde_json::from_value(created)?;
        info!(number = issue.number, "Issue created");
        Ok(issue.into())
    }

    async fn update_issue(&self, number: u64, input: UpdateIssueInput) -> Result<Issue> {
        if let Some(state) = &input.state {
            check_state(state, &["open", "closed"])?;
        }
        if let Some(title) = &input.title {
            require_title(title)?;
        }

        let body = serde_json::to_value(UpdateIssueRequest {
            title: input.title,
            body: input.body,
            state: input.state,
            labels: input.labels,
            assignees: input.assignees,
            milestone: input.milestone,
        })?;
        if body.as_object().is_some_and(Map::is_empty) {
            return Err(Error::InvalidData("No fields to update".to_string()));
        }

        let updated = self
            .write(
                ApiRequest::patch(self.repo_path(&format!("/issues/{}", number)), body),
                &self.issue_patterns(),
            )
            .await?;

        let issue: GitHubIssue = serde_json::from_value(updated)?;
        Ok(issue.into())
    }

    async fn search_issues(&self, search: IssueSearch) -> Result<Page<Issue>> {
        let terms = search.query.trim();
        if terms.is_empty() {
            return Err(Error::InvalidData("Search query must not be empty".to_string()));
        }

        let q = format!("repo:{}/{} is:issue {}", self.owner, self.repo, terms);
        let per_page = page_size(search.per_page);
        let max_pages = search.max_pages.unwrap_or(1);

        let page = paginate(per_page, max_pages, |page| {
            let request = ApiRequest::get("/search/issues")
                .with_query("q", &q)
                .with_query("per_page", per_page)
                .with_query("page", page);
            async move {
                let result: GitHubSearchResult =
                    self.get_json(request, TtlClass::Search).await?;
                Ok(result.items)
            }
        })
        .await?;

        Ok(Page {
            items: page.items.into_iter().map(Issue::from).collect(),
            has_next_page: page.has_next_page,
        })
    }

    async fn bulk_add_labels(&self, numbers: &[u64], labels: &[String]) -> Result<BulkOutcome> {
        if numbers.is_empty() {
            return Err(Error::InvalidData("No issue numbers given".to_string()));
        }
        if labels.is_empty() {
            return Err(Error::InvalidData("No labels given".to_string()));
        }

        let mut results = Vec::with_capacity(numbers.len());
        for &number in numbers {
            let request = ApiRequest::post(
                self.repo_path(&format!("/issues/{}/labels", number)),
                json!({ "labels": labels }),
            );
            match self.executor.execute(request).await {
                Ok(_) => results.push(BulkItemResult {
                    number,
                    success: true,
                    error: None,
                }),
                Err(e) => {
                    warn!(number, error = %e, "Adding labels failed");
                    results.push(BulkItemResult {
                        number,
                        success: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let outcome = BulkOutcome::from_results(results);
        if outcome.succeeded > 0 {
            cached::invalidate(&self.cache, &self.issue_patterns());
        }
        info!(
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            "Bulk label update finished"
        );
        Ok(outcome)
    }
}

// =============================================================================
// Milestones
// =============================================================================

#[async_trait]
impl MilestoneProvider for GitHubClient {
    async fn list_milestones(&self, filter: MilestoneFilter) -> Result<Page<Milestone>> {
        let state = filter.state.clone().unwrap_or_else(|| "open".to_string());
        check_state(&state, &["open", "closed", "all"])?;

        let per_page = page_size(filter.per_page);
        let max_pages = filter.max_pages.unwrap_or(DEFAULT_MAX_PAGES);
        let path = self.repo_path("/milestones");

        let page = paginate(per_page, max_pages, |page| {
            let request = ApiRequest::get(path.clone())
                .with_query("state", &state)
                .with_query("per_page", per_page)
                .with_query("page", page);
            self.get_json::<Vec<GitHubMilestone>>(request, TtlClass::List)
        })
        .await?;

        Ok(Page {
            items: page.items.into_iter().map(Milestone::from).collect(),
            has_next_page: page.has_next_page,
        })
    }

    async fn get_milestone(&self, number: u64) -> Result<Milestone> {
        let request = ApiRequest::get(self.repo_path(&format!("/milestones/{}", number)));
        let milestone: GitHubMilestone = self.get_json(request, TtlClass::Entity).await?;
        Ok(milestone.into())
    }

    async fn create_milestone(&self, input: CreateMilestoneInput) -> Result<Milestone> {
        require_title(&input.title)?;

        let body = serde_json::to_value(MilestoneRequest {
            title: Some(input.title),
            description: input.description,
            due_on: input.due_on,
            state: None,
        })?;
        let created = self
            .write(
                ApiRequest::post(self.repo_path("/milestones"), body),
                &self.milestone_patterns(),
            )
            .await?;

        let milestone: GitHubMilestone = serde_json::from_value(created)?;
        info!(number = milestone.number, "Milestone created");
        Ok(milestone.into())
    }

    async fn update_milestone(
        &self,
        number: u64,
        input: UpdateMilestoneInput,
    ) -> Result<Milestone> {
        if let Some(state) = &input.state {
            check_state(state, &["open", "closed"])?;
        }
        if let Some(title) = &input.title {
            require_title(title)?;
        }

        let body = serde_json::to_value(MilestoneRequest {
            title: input.title,
            description: input.description,
            due_on: input.due_on,
            state: input.state,
        })?;
        if body.as_object().is_some_and(Map::is_empty) {
            return Err(Error::InvalidData("No fields to update".to_string()));
        }

        let updated = self
            .write(
                ApiRequest::patch(self.repo_path(&format!("/milestones/{}", number)), body),
                &self.milestone_patterns(),
            )
            .await?;

        let milestone: GitHubMilestone = serde_json::from_value(updated)?;
        Ok(milestone.into())
    }

    async fn delete_milestone(&self, number: u64) -> Result<()> {
        self.write(
            ApiRequest::delete(self.repo_path(&format!("/milestones/{}", number))),
            &self.milestone_patterns(),
        )
        .await?;
        info!(number, "Milestone deleted");
        Ok(())
    }
}

// =============================================================================
// Projects
// =============================================================================

#[async_trait]
impl ProjectProvider for GitHubClient {
    async fn list_projects(&self, filter: ProjectFilter) -> Result<Vec<Project>> {
        let owner = filter.owner.unwrap_or_else(|| self.owner.clone());
        let first = filter.first.unwrap_or(DEFAULT_PROJECTS_FIRST).clamp(1, 100);

        let key = graphql_key("projects", &json!({ "owner": owner, "first": first }));
        let ttl = TtlClass::List.ttl(&self.cache_config);

        cached(&self.cache, &key, ttl, || async {
            let query = GraphQlQuery::new(format!(
                "repositoryOwner(login: $owner) {{ ... on ProjectV2Owner {{ projectsV2(first: $first) {{ nodes {{ {} }} }} }} }}",
                PROJECT_FIELDS
            ))
            .variable("owner", "String!", owner.as_str())
            .variable("first", "Int!", first);

            let data = self.batcher.submit(query).await?;
            if data.is_null() {
                return Err(Error::NotFound(format!("Owner '{}' not found", owner)));
            }

            let connection: GitHubProjectConnection =
                serde_json::from_value(data["projectsV2"].clone())?;
            Ok(connection
                .nodes
                .into_iter()
                .flatten()
                .map(Project::from)
                .collect::<Vec<_>>())
        })
        .await
    }

    async fn get_project(&self, id: &str) -> Result<Project> {
        let key = graphql_key("project", &json!({ "id": id }));
        let ttl = TtlClass::Entity.ttl(&self.cache_config);

        cached(&self.cache, &key, ttl, || async {
            let query = GraphQlQuery::new(format!(
                "node(id: $id) {{ ... on ProjectV2 {{ {} }} }}",
                PROJECT_FIELDS
            ))
            .variable("id", "ID!", id);

            let data = self.batcher.submit(query).await?;
            if data.get("id").is_none() {
                return Err(Error::NotFound(format!("Project '{}' not found", id)));
            }
            project_at(&data, "")
        })
        .await
    }

    async fn create_project(&self, input: CreateProjectInput) -> Result<Project> {
        require_title(&input.title)?;
        let owner = input.owner.unwrap_or_else(|| self.owner.clone());

        let data = self
            .batcher
            .submit(
                GraphQlQuery::new("repositoryOwner(login: $login) { id }")
                    .variable("login", "String!", owner.as_str()),
            )
            .await?;
        let owner_id = data
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::NotFound(format!("Owner '{}' not found", owner)))?
            .to_string();

        let mutation = format!(
            "mutation($ownerId: ID!, $title: String!) {{ createProjectV2(input: {{ownerId: $ownerId, title: $title}}) {{ projectV2 {{ {} }} }} }}",
            PROJECT_FIELDS
        );
        let data = self
            .executor
            .execute_graphql(&mutation, json!({ "ownerId": owner_id, "title": input.title }))
            .await?;

        cached::invalidate(&self.cache, &Self::project_patterns());
        let project = project_at(&data, "/createProjectV2/projectV2")?;
        info!(id = %project.id, owner = %owner, "Project created");
        Ok(project)
    }

    async fn update_project(&self, id: &str, input: UpdateProjectInput) -> Result<Project> {
        let mut update = Map::new();
        update.insert("projectId".to_string(), json!(id));
        if let Some(title) = input.title {
            require_title(&title)?;
            update.insert("title".to_string(), json!(title));
        }
        if let Some(description) = input.description {
            update.insert("shortDescription".to_string(), json!(description));
        }
        if let Some(closed) = input.closed {
            update.insert("closed".to_string(), json!(closed));
        }
        if update.len() == 1 {
            return Err(Error::InvalidData("No fields to update".to_string()));
        }

        let mutation = format!(
            "mutation($input: UpdateProjectV2Input!) {{ updateProjectV2(input: $input) {{ projectV2 {{ {} }} }} }}",
            PROJECT_FIELDS
        );
        let data = self
            .executor
            .execute_graphql(&mutation, json!({ "input": update }))
            .await?;

        cached::invalidate(&self.cache, &Self::project_patterns());
        project_at(&data, "/updateProjectV2/projectV2")
    }

    async fn delete_project(&self, id: &str) -> Result<()> {
        self.executor
            .execute_graphql(
                "mutation($input: DeleteProjectV2Input!) { deleteProjectV2(input: $input) { projectV2 { id } } }",
                json!({ "input": { "projectId": id } }),
            )
            .await?;

        cached::invalidate(&self.cache, &Self::project_patterns());
        info!(id, "Project deleted");
        Ok(())
    }
}

#[async_trait]
impl Provider for GitHubClient {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn api_status(&self) -> Result<ApiStatus> {
        if self.rate_limits().snapshots().is_empty() {
            if let Err(e) = self.refresh_rate_limits().await {
                warn!(error = %e, "Could not refresh rate limits");
            }
        }

        let cache = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stats();

        Ok(ApiStatus {
            rate_limits: self.surface_statuses(),
            cache,
        })
    }

    /// Reject queued GraphQL reads and stop the cache sweeper.
    fn shutdown(&self) {
        self.batcher.shutdown();
        if let Some(handle) = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        info!(owner = %self.owner, repo = %self.repo, "GitHub client shut down");
    }
}
