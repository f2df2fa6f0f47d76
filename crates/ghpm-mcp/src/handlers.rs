//! Tool execution.
//!
//! Arguments are decoded into typed requests, passed to the provider, and the
//! outcome is wrapped in a JSON envelope:
//! `{"success": true, "data": ...}` or
//! `{"success": false, "error": {"code": ..., "message": ...}}`.

use std::sync::Arc;

use ghpm_core::{
    CreateIssueInput, CreateMilestoneInput, CreateProjectInput, Error, IssueFilter, IssueSearch,
    MilestoneFilter, ProjectFilter, Provider, UpdateIssueInput, UpdateMilestoneInput,
    UpdateProjectInput,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::protocol::{ToolCallResult, ToolDefinition};
use crate::tools::tool_definitions;

/// Failure reported back to the host inside the error envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolError {
    pub code: &'static str,
    pub message: String,
}

impl ToolError {
    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: "invalid_params",
            message: message.into(),
        }
    }
}

impl From<Error> for ToolError {
    fn from(e: Error) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
        }
    }
}

type ToolResult = std::result::Result<Value, ToolError>;

fn parse<T: DeserializeOwned>(arguments: Value) -> std::result::Result<T, ToolError> {
    serde_json::from_value(arguments).map_err(|e| ToolError::invalid_params(e.to_string()))
}

fn to_data<T: Serialize>(value: T) -> ToolResult {
    serde_json::to_value(value).map_err(|e| ToolError::from(Error::from(e)))
}

#[derive(Debug, Deserialize)]
struct ProjectIdArgs {
    project_id: String,
}

#[derive(Debug, Deserialize)]
struct UpdateProjectArgs {
    project_id: String,
    #[serde(flatten)]
    input: UpdateProjectInput,
}

#[derive(Debug, Deserialize)]
struct IssueNumberArgs {
    issue_number: u64,
}

#[derive(Debug, Deserialize)]
struct UpdateIssueArgs {
    issue_number: u64,
    #[serde(flatten)]
    input: UpdateIssueInput,
}

#[derive(Debug, Deserialize)]
struct BulkLabelArgs {
    issue_numbers: Vec<u64>,
    labels: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MilestoneNumberArgs {
    milestone_number: u64,
}

#[derive(Debug, Deserialize)]
struct UpdateMilestoneArgs {
    milestone_number: u64,
    #[serde(flatten)]
    input: UpdateMilestoneInput,
}

/// Executes tools against a provider.
pub struct ToolHandler {
    provider: Arc<dyn Provider>,
}

impl ToolHandler {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn available_tools(&self) -> Vec<ToolDefinition> {
        tool_definitions()
    }

    /// Run a tool and wrap the outcome in the result envelope.
    pub async fn execute(&self, name: &str, arguments: Option<Value>) -> ToolCallResult {
        let arguments = match arguments {
            None | Some(Value::Null) => json!({}),
            Some(value) => value,
        };

        match self.dispatch(name, arguments).await {
            Ok(data) => {
                debug!(tool = name, "Tool succeeded");
                ToolCallResult::text(envelope(json!({ "success": true, "data": data })))
            }
            Err(e) => {
                warn!(tool = name, code = e.code, error = %e.message, "Tool failed");
                ToolCallResult::error(envelope(json!({
                    "success": false,
                    "error": { "code": e.code, "message": e.message },
                })))
            }
        }
    }

    async fn dispatch(&self, name: &str, arguments: Value) -> ToolResult {
        let provider = self.provider.as_ref();

        match name {
            "list_projects" => {
                let filter: ProjectFilter = parse(arguments)?;
                to_data(provider.list_projects(filter).await?)
            }
            "get_project" => {
                let args: ProjectIdArgs = parse(arguments)?;
                to_data(provider.get_project(&args.project_id).await?)
            }
            "create_project" => {
                let input: CreateProjectInput = parse(arguments)?;
                to_data(provider.create_project(input).await?)
            }
            "update_project" => {
                let args: UpdateProjectArgs = parse(arguments)?;
                to_data(provider.update_project(&args.project_id, args.input).await?)
            }
            "delete_project" => {
                let args: ProjectIdArgs = parse(arguments)?;
                provider.delete_project(&args.project_id).await?;
                Ok(json!({ "deleted": true, "project_id": args.project_id }))
            }

            "list_issues" => {
                let filter: IssueFilter = parse(arguments)?;
                to_data(provider.list_issues(filter).await?)
            }
            "get_issue" => {
                let args: IssueNumberArgs = parse(arguments)?;
                to_data(provider.get_issue(args.issue_number).await?)
            }
            "create_issue" => {
                let input: CreateIssueInput = parse(arguments)?;
                to_data(provider.create_issue(input).await?)
            }
            "update_issue" => {
                let args: UpdateIssueArgs = parse(arguments)?;
                to_data(provider.update_issue(args.issue_number, args.input).await?)
            }
            "search_issues" => {
                let search: IssueSearch = parse(arguments)?;
                to_data(provider.search_issues(search).await?)
            }
            "bulk_add_labels" => {
                let args: BulkLabelArgs = parse(arguments)?;
                to_data(
                    provider
                        .bulk_add_labels(&args.issue_numbers, &args.labels)
                        .await?,
                )
            }

            "list_milestones" => {
                let filter: MilestoneFilter = parse(arguments)?;
                to_data(provider.list_milestones(filter).await?)
            }
            "get_milestone" => {
                let args: MilestoneNumberArgs = parse(arguments)?;
                to_data(provider.get_milestone(args.milestone_number).await?)
            }
            "create_milestone" => {
                let input: CreateMilestoneInput = parse(arguments)?;
                to_data(provider.create_milestone(input).await?)
            }
            "update_milestone" => {
                let args: UpdateMilestoneArgs = parse(arguments)?;
                to_data(
                    provider
                        .update_milestone(args.milestone_number, args.input)
                        .await?,
                )
            }
            "delete_milestone" => {
                let args: MilestoneNumberArgs = parse(arguments)?;
                provider.delete_milestone(args.milestone_number).await?;
                Ok(json!({ "deleted": true, "milestone_number": args.milestone_number }))
            }

            "get_api_status" => to_data(provider.api_status().await?),

            _ => Err(ToolError {
                code: "unknown_tool",
                message: format!("Unknown tool: {}", name),
            }),
        }
    }
}

fn envelope(value: Value) -> String {
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ghpm_core::{
        ApiStatus, BulkItemResult, BulkOutcome, CacheStats, Issue, IssueProvider, Milestone,
        MilestoneProvider, Page, Project, ProjectProvider, Result,
    };
    use std::sync::Mutex;

    /// Records calls and answers with canned data.
    #[derive(Default)]
    struct FakeProvider {
        calls: Mutex<Vec<String>>,
    }

    impl FakeProvider {
        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    fn issue(number: u64) -> Issue {
        Issue {
            number,
            title: format!("Issue {}", number),
            body: None,
            state: "open".into(),
            labels: vec![],
            assignees: vec![],
            author: Some("alice".into()),
            milestone: None,
            url: format!("https://github.com/o/r/issues/{}", number),
            created_at: "2024-01-01T00:00:00Z".into(),
            updated_at: "2024-01-01T00:00:00Z".into(),
            closed_at: None,
        }
    }

    fn milestone(number: u64) -> Milestone {
        Milestone {
            number,
            title: "v1.0".into(),
            description: None,
            state: "open".into(),
            due_on: None,
            open_issues: 0,
            closed_issues: 0,
            url: String::new(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn project(id: &str) -> Project {
        Project {
            id: id.into(),
            number: 1,
            title: "Roadmap".into(),
            description: None,
            closed: false,
            url: String::new(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[async_trait]
    impl IssueProvider for FakeProvider {
        async fn list_issues(&self, filter: IssueFilter) -> Result<Page<Issue>> {
            self.record(format!("list_issues:{:?}:{:?}", filter.state, filter.labels));
            Ok(Page {
                items: vec![issue(1), issue(2)],
                has_next_page: false,
            })
        }
        async fn get_issue(&self, number: u64) -> Result<Issue> {
            if number == 404 {
                return Err(Error::NotFound(format!("issue {}", number)));
            }
            Ok(issue(number))
        }
        async fn create_issue(&self, input: CreateIssueInput) -> Result<Issue> {
            self.record(format!("create_issue:{}", input.title));
            Ok(issue(3))
        }
        async fn update_issue(&self, number: u64, input: UpdateIssueInput) -> Result<Issue> {
            self.record(format!("update_issue:{}:{:?}", number, input.state));
            Ok(issue(number))
        }
        async fn search_issues(&self, search: IssueSearch) -> Result<Page<Issue>> {
            self.record(format!("search_issues:{}", search.query));
            Ok(Page {
                items: vec![],
                has_next_page: false,
            })
        }
        async fn bulk_add_labels(&self, numbers: &[u64], _labels: &[String]) -> Result<BulkOutcome> {
            Ok(BulkOutcome::from_results(
                numbers
                    .iter()
                    .map(|&number| BulkItemResult {
                        number,
                        success: number != 2,
                        error: (number == 2).then(|| "Not found".to_string()),
                    })
                    .collect(),
            ))
        }
    }

    #[async_trait]
    impl MilestoneProvider for FakeProvider {
        async fn list_milestones(&self, _filter: MilestoneFilter) -> Result<Page<Milestone>> {
            Ok(Page {
                items: vec![milestone(1)],
                has_next_page: false,
            })
        }
        async fn get_milestone(&self, number: u64) -> Result<Milestone> {
            Ok(milestone(number))
        }
        async fn create_milestone(&self, _input: CreateMilestoneInput) -> Result<Milestone> {
            Ok(milestone(5))
        }
        async fn update_milestone(
            &self,
            number: u64,
            _input: UpdateMilestoneInput,
        ) -> Result<Milestone> {
            Ok(milestone(number))
        }
        async fn delete_milestone(&self, number: u64) -> Result<()> {
            self.record(format!("delete_milestone:{}", number));
            Ok(())
        }
    }

    #[async_trait]
    impl ProjectProvider for FakeProvider {
        async fn list_projects(&self, filter: ProjectFilter) -> Result<Vec<Project>> {
            self.record(format!("list_projects:{:?}", filter.owner));
            Ok(vec![project("PVT_1")])
        }
        async fn get_project(&self, id: &str) -> Result<Project> {
            Ok(project(id))
        }
        async fn create_project(&self, _input: CreateProjectInput) -> Result<Project> {
            Ok(project("PVT_new"))
        }
        async fn update_project(&self, id: &str, input: UpdateProjectInput) -> Result<Project> {
            self.record(format!("update_project:{}:{:?}", id, input.closed));
            Ok(project(id))
        }
        async fn delete_project(&self, _id: &str) -> Result<()> {
            Err(Error::RateLimited {
                endpoint: "POST /graphql".into(),
                attempts: 3,
                snapshot: None,
                retry_after: None,
            })
        }
    }

    #[async_trait]
    impl Provider for FakeProvider {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn api_status(&self) -> Result<ApiStatus> {
            Ok(ApiStatus {
                rate_limits: vec![],
                cache: CacheStats::default(),
            })
        }
    }

    fn handler() -> (Arc<FakeProvider>, ToolHandler) {
        let provider = Arc::new(FakeProvider::default());
        (provider.clone(), ToolHandler::new(provider))
    }

    fn body(result: &ToolCallResult) -> Value {
        serde_json::from_str(result.first_text()).unwrap()
    }

    #[tokio::test]
    async fn test_success_envelope() {
        let (provider, handler) = handler();
        let result = handler
            .execute(
                "list_issues",
                Some(json!({"state": "closed", "labels": ["bug"]})),
            )
            .await;

        assert!(result.is_error.is_none());
        let body = body(&result);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["items"].as_array().unwrap().len(), 2);
        assert_eq!(body["data"]["has_next_page"], false);
        assert_eq!(
            provider.calls.lock().unwrap()[0],
            "list_issues:Some(\"closed\"):[\"bug\"]"
        );
    }

    #[tokio::test]
    async fn test_provider_error_envelope() {
        let (_, handler) = handler();
        let result = handler
            .execute("get_issue", Some(json!({"issue_number": 404})))
            .await;

        assert_eq!(result.is_error, Some(true));
        let body = body(&result);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "not_found");
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("issue 404"));
    }

    #[tokio::test]
    async fn test_rate_limit_error_code() {
        let (_, handler) = handler();
        let result = handler
            .execute("delete_project", Some(json!({"project_id": "PVT_1"})))
            .await;
        assert_eq!(body(&result)["error"]["code"], "rate_limited");
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let (_, handler) = handler();

        let result = handler.execute("get_issue", None).await;
        assert_eq!(result.is_error, Some(true));
        assert_eq!(body(&result)["error"]["code"], "invalid_params");

        let result = handler
            .execute("get_issue", Some(json!({"issue_number": "seven"})))
            .await;
        assert_eq!(body(&result)["error"]["code"], "invalid_params");

        let result = handler.execute("create_issue", Some(json!({}))).await;
        assert_eq!(body(&result)["error"]["code"], "invalid_params");
    }

    #[tokio::test]
    async fn test_flattened_update_arguments() {
        let (provider, handler) = handler();

        handler
            .execute(
                "update_issue",
                Some(json!({"issue_number": 9, "state": "closed"})),
            )
            .await;
        handler
            .execute(
                "update_project",
                Some(json!({"project_id": "PVT_1", "closed": true})),
            )
            .await;

        let calls = provider.calls.lock().unwrap();
        assert_eq!(calls[0], "update_issue:9:Some(\"closed\")");
        assert_eq!(calls[1], "update_project:PVT_1:Some(true)");
    }

    #[tokio::test]
    async fn test_bulk_and_delete_results() {
        let (provider, handler) = handler();

        let result = handler
            .execute(
                "bulk_add_labels",
                Some(json!({"issue_numbers": [1, 2, 3], "labels": ["triage"]})),
            )
            .await;
        let data = &body(&result)["data"];
        assert_eq!(data["succeeded"], 2);
        assert_eq!(data["failed"], 1);
        assert_eq!(data["results"][1]["error"], "Not found");

        let result = handler
            .execute("delete_milestone", Some(json!({"milestone_number": 4})))
            .await;
        assert_eq!(body(&result)["data"]["deleted"], true);
        assert!(provider
            .calls
            .lock()
            .unwrap()
            .contains(&"delete_milestone:4".to_string()));
    }

    #[tokio::test]
    async fn test_list_projects_without_arguments() {
        let (provider, handler) = handler();
        let result = handler.execute("list_projects", None).await;

        assert_eq!(body(&result)["data"][0]["id"], "PVT_1");
        assert_eq!(provider.calls.lock().unwrap()[0], "list_projects:None");
    }

    #[tokio::test]
    async fn test_api_status_and_unknown_tool() {
        let (_, handler) = handler();

        let result = handler.execute("get_api_status", None).await;
        assert_eq!(body(&result)["data"]["cache"]["hits"], 0);

        let result = handler.execute("get_merge_requests", None).await;
        assert_eq!(result.is_error, Some(true));
        assert_eq!(body(&result)["error"]["code"], "unknown_tool");
    }

    #[test]
    fn test_every_defined_tool_is_dispatched() {
        let (_, handler) = handler();
        let runtime = tokio::runtime::Runtime::new().unwrap();

        for tool in handler.available_tools() {
            let result = runtime.block_on(handler.execute(&tool.name, Some(json!({}))));
            assert_ne!(
                body(&result)["error"]["code"],
                "unknown_tool",
                "{} is not dispatched",
                tool.name
            );
        }
    }
}
