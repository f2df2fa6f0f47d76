//! Domain types shared by providers and the MCP layer.

use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;
use crate::rate_limit::{ApiSurface, RateLimitSnapshot};

// =============================================================================
// Entities
// =============================================================================

/// Milestone reference embedded in an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneRef {
    pub number: u64,
    pub title: String,
}

/// A repository issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    /// "open" or "closed"
    pub state: String,
    pub labels: Vec<String>,
    /// Assignee logins
    pub assignees: Vec<String>,
    pub author: Option<String>,
    pub milestone: Option<MilestoneRef>,
    pub url: String,
    pub created_at: String,
    pub updated_at: String,
    pub closed_at: Option<String>,
}

/// A repository milestone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub number: u64,
    pub title: String,
    pub description: Option<String>,
    pub state: String,
    pub due_on: Option<String>,
    pub open_issues: u64,
    pub closed_issues: u64,
    pub url: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A GitHub project (ProjectV2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// GraphQL node ID
    pub id: String,
    pub number: u64,
    pub title: String,
    pub description: Option<String>,
    pub closed: bool,
    pub url: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Result of a paginated listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// `true` when the page cap stopped the listing before the data ran out
    pub has_next_page: bool,
}

// =============================================================================
// Filters and inputs
// =============================================================================

/// Filter for listing issues.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IssueFilter {
    /// "open", "closed" or "all"
    pub state: Option<String>,
    pub labels: Vec<String>,
    pub assignee: Option<String>,
    /// Milestone number, "none" or "*"
    pub milestone: Option<String>,
    pub per_page: Option<u32>,
    pub max_pages: Option<u32>,
}

/// Free-text issue search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IssueSearch {
    pub query: String,
    pub per_page: Option<u32>,
    pub max_pages: Option<u32>,
}

/// Input for creating an issue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateIssueInput {
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub assignees: Vec<String>,
    #[serde(default)]
    pub milestone: Option<u64>,
}

/// Input for updating an issue. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateIssueInput {
    pub title: Option<String>,
    pub body: Option<String>,
    pub state: Option<String>,
    pub labels: Option<Vec<String>>,
    pub assignees: Option<Vec<String>>,
    pub milestone: Option<u64>,
}

/// Filter for listing milestones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MilestoneFilter {
    pub state: Option<String>,
    pub per_page: Option<u32>,
    pub max_pages: Option<u32>,
}

/// Input for creating a milestone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateMilestoneInput {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// ISO 8601 timestamp
    #[serde(default)]
    pub due_on: Option<String>,
}

/// Input for updating a milestone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateMilestoneInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub due_on: Option<String>,
    pub state: Option<String>,
}

/// Filter for listing projects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectFilter {
    /// Owner login; defaults to the configured repository owner
    pub owner: Option<String>,
    pub first: Option<u32>,
}

/// Input for creating a project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateProjectInput {
    pub title: String,
    #[serde(default)]
    pub owner: Option<String>,
}

/// Input for updating a project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateProjectInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub closed: Option<bool>,
}

// =============================================================================
// Bulk operations and status
// =============================================================================

/// Per-issue outcome of a bulk operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkItemResult {
    pub number: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate of a bulk operation; failures do not abort the remaining items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkOutcome {
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<BulkItemResult>,
}

impl BulkOutcome {
    pub fn from_results(results: Vec<BulkItemResult>) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            succeeded,
            failed: results.len() - succeeded,
            results,
        }
    }
}

/// Rate-limit state of one API surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceStatus {
    pub surface: ApiSurface,
    #[serde(flatten)]
    pub snapshot: RateLimitSnapshot,
}

/// Client health: quotas and cache effectiveness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiStatus {
    pub rate_limits: Vec<SurfaceStatus>,
    pub cache: CacheStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulk_outcome_counts() {
        let outcome = BulkOutcome::from_results(vec![
            BulkItemResult {
                number: 1,
                success: true,
                error: None,
            },
            BulkItemResult {
                number: 2,
                success: false,
                error: Some("Not found".into()),
            },
            BulkItemResult {
                number: 3,
                success: true,
                error: None,
            },
        ]);
        assert_eq!(outcome.succeeded, 2);
        assert_eq!(outcome.failed, 1);

        let json = serde_json::to_value(&outcome).unwrap();
        assert!(json["results"][0].get("error").is_none());
        assert_eq!(json["results"][1]["error"], "Not found");
    }

    #[test]
    fn test_filters_deserialize_from_partial_json() {
        let filter: IssueFilter =
            serde_json::from_value(serde_json::json!({"state": "closed", "labels": ["bug"]}))
                .unwrap();
        assert_eq!(filter.state.as_deref(), Some("closed"));
        assert_eq!(filter.labels, vec!["bug"]);
        assert!(filter.per_page.is_none());

        let input: CreateIssueInput =
            serde_json::from_value(serde_json::json!({"title": "Bug"})).unwrap();
        assert_eq!(input.title, "Bug");
        assert!(input.labels.is_empty());

        assert!(serde_json::from_value::<CreateIssueInput>(serde_json::json!({})).is_err());
    }
}
