//! GitHub API response types.
//!
//! These types represent the raw JSON responses from GitHub API.
//! They are deserialized and then mapped to unified types.

use ghpm_core::{Issue, Milestone, MilestoneRef, Project};
use serde::{Deserialize, Serialize};

// =============================================================================
// Users and labels
// =============================================================================

/// GitHub user representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubUser {
    pub login: String,
    #[serde(default)]
    pub id: Option<u64>,
}

/// GitHub label representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubLabel {
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

// =============================================================================
// Issues
// =============================================================================

/// GitHub issue representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubIssue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub state: String,
    pub html_url: String,
    #[serde(default)]
    pub user: Option<GitHubUser>,
    #[serde(default)]
    pub assignees: Vec<GitHubUser>,
    #[serde(default)]
    pub labels: Vec<GitHubLabel>,
    #[serde(default)]
    pub milestone: Option<GitHubMilestone>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub closed_at: Option<String>,
    /// PRs are also returned by /issues endpoint, this field distinguishes them
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
}

impl GitHubIssue {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }
}

impl From<GitHubIssue> for Issue {
    fn from(gh: GitHubIssue) -> Self {
        Issue {
            number: gh.number,
            title: gh.title,
            body: gh.body,
            state: gh.state,
            labels: gh.labels.into_iter().map(|l| l.name).collect(),
            assignees: gh.assignees.into_iter().map(|u| u.login).collect(),
            author: gh.user.map(|u| u.login),
            milestone: gh.milestone.map(|m| MilestoneRef {
                number: m.number,
                title: m.title,
            }),
            url: gh.html_url,
            created_at: gh.created_at,
            updated_at: gh.updated_at,
            closed_at: gh.closed_at,
        }
    }
}

/// Body of `GET /search/issues`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubSearchResult {
    pub total_count: u64,
    #[serde(default)]
    pub incomplete_results: bool,
    pub items: Vec<GitHubIssue>,
}

// =============================================================================
// Milestones
// =============================================================================

/// GitHub milestone representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubMilestone {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_open")]
    pub state: String,
    #[serde(default)]
    pub due_on: Option<String>,
    #[serde(default)]
    pub open_issues: u64,
    #[serde(default)]
    pub closed_issues: u64,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

fn default_open() -> String {
    "open".to_string()
}

impl From<GitHubMilestone> for Milestone {
    fn from(gh: GitHubMilestone) -> Self {
        Milestone {
            number: gh.number,
            title: gh.title,
            description: gh.description,
            state: gh.state,
            due_on: gh.due_on,
            open_issues: gh.open_issues,
            closed_issues: gh.closed_issues,
            url: gh.html_url,
            created_at: gh.created_at,
            updated_at: gh.updated_at,
        }
    }
}

// =============================================================================
// Projects (GraphQL)
// =============================================================================

/// ProjectV2 node as selected by the client's GraphQL fragments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitHubProjectNode {
    pub id: String,
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub short_description: Option<String>,
    #[serde(default)]
    pub closed: bool,
    pub url: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<GitHubProjectNode> for Project {
    fn from(node: GitHubProjectNode) -> Self {
        Project {
            id: node.id,
            number: node.number,
            title: node.title,
            description: node.short_description,
            closed: node.closed,
            url: node.url,
            created_at: node.created_at,
            updated_at: node.updated_at,
        }
    }
}

/// `projectsV2` connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubProjectConnection {
    #[serde(default)]
    pub nodes: Vec<Option<GitHubProjectNode>>,
}

// =============================================================================
// Rate limit
// =============================================================================

/// One bucket of `GET /rate_limit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubRateResource {
    pub limit: u64,
    pub remaining: u64,
    pub reset: i64,
    #[serde(default)]
    pub used: Option<u64>,
}

/// Body of `GET /rate_limit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubRateLimitResponse {
    pub resources: std::collections::HashMap<String, GitHubRateResource>,
}

// =============================================================================
// Request bodies
// =============================================================================

/// Body of `POST /repos/{owner}/{repo}/issues`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateIssueRequest {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub assignees: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone: Option<u64>,
}

/// Body of `PATCH /repos/{owner}/{repo}/issues/{number}`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateIssueRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignees: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone: Option<u64>,
}

/// Body of milestone create/update calls.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MilestoneRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_on: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_issue_mapping() {
        let gh: GitHubIssue = serde_json::from_value(json!({
            "number": 7,
            "title": "Crash on start",
            "state": "open",
            "html_url": "https://github.com/o/r/issues/7",
            "user": {"login": "alice", "id": 1},
            "assignees": [{"login": "bob"}],
            "labels": [{"name": "bug", "color": "d73a4a"}],
            "milestone": {"number": 2, "title": "v1.0"},
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-02T00:00:00Z"
        }))
        .unwrap();
        assert!(!gh.is_pull_request());

        let issue = Issue::from(gh);
        assert_eq!(issue.author.as_deref(), Some("alice"));
        assert_eq!(issue.assignees, vec!["bob"]);
        assert_eq!(issue.labels, vec!["bug"]);
        assert_eq!(issue.milestone.unwrap().title, "v1.0");
        assert!(issue.closed_at.is_none());
    }

    #[test]
    fn test_project_node_mapping() {
        let node: GitHubProjectNode = serde_json::from_value(json!({
            "id": "PVT_kwDOA",
            "number": 3,
            "title": "Roadmap",
            "shortDescription": "Q3 plan",
            "closed": false,
            "url": "https://github.com/orgs/o/projects/3",
            "createdAt": "2024-01-01T00:00:00Z",
            "updatedAt": "2024-01-05T00:00:00Z"
        }))
        .unwrap();

        let project = Project::from(node);
        assert_eq!(project.id, "PVT_kwDOA");
        assert_eq!(project.description.as_deref(), Some("Q3 plan"));
    }

    #[test]
    fn test_update_request_skips_unset_fields() {
        let body = serde_json::to_value(UpdateIssueRequest {
            state: Some("closed".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(body, json!({"state": "closed"}));
    }
}
