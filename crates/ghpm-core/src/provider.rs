//! Provider traits for GitHub project management.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    ApiStatus, BulkOutcome, CreateIssueInput, CreateMilestoneInput, CreateProjectInput, Issue,
    IssueFilter, IssueSearch, Milestone, MilestoneFilter, Page, Project, ProjectFilter,
    UpdateIssueInput, UpdateMilestoneInput, UpdateProjectInput,
};

/// Issue operations.
#[async_trait]
pub trait IssueProvider: Send + Sync {
    async fn list_issues(&self, filter: IssueFilter) -> Result<Page<Issue>>;

    async fn get_issue(&self, number: u64) -> Result<Issue>;

    async fn create_issue(&self, input: CreateIssueInput) -> Result<Issue>;

    async fn update_issue(&self, number: u64, input: UpdateIssueInput) -> Result<Issue>;

    async fn search_issues(&self, search: IssueSearch) -> Result<Page<Issue>>;

    /// Add labels to many issues; failures are collected per issue.
    async fn bulk_add_labels(&self, numbers: &[u64], labels: &[String]) -> Result<BulkOutcome>;
}

/// Milestone operations.
#[async_trait]
pub trait MilestoneProvider: Send + Sync {
    async fn list_milestones(&self, filter: MilestoneFilter) -> Result<Page<Milestone>>;

    async fn get_milestone(&self, number: u64) -> Result<Milestone>;

    async fn create_milestone(&self, input: CreateMilestoneInput) -> Result<Milestone>;

    async fn update_milestone(&self, number: u64, input: UpdateMilestoneInput)
        -> Result<Milestone>;

    async fn delete_milestone(&self, number: u64) -> Result<()>;
}

/// Project (ProjectV2) operations.
#[async_trait]
pub trait ProjectProvider: Send + Sync {
    async fn list_projects(&self, filter: ProjectFilter) -> Result<Vec<Project>>;

    /// Fetch by GraphQL node ID.
    async fn get_project(&self, id: &str) -> Result<Project>;

    async fn create_project(&self, input: CreateProjectInput) -> Result<Project>;

    async fn update_project(&self, id: &str, input: UpdateProjectInput) -> Result<Project>;

    async fn delete_project(&self, id: &str) -> Result<()>;
}

/// Everything the MCP layer needs from a backend.
#[async_trait]
pub trait Provider: IssueProvider + MilestoneProvider + ProjectProvider {
    /// Provider name (e.g., "github")
    fn name(&self) -> &'static str;

    /// Current quota and cache state.
    async fn api_status(&self) -> Result<ApiStatus>;

    /// Stop background work and reject queued requests.
    fn shutdown(&self) {}
}
