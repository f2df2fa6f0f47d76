//! MCP tool definitions.

use serde_json::{json, Value};

use crate::protocol::ToolDefinition;

fn tool(name: &str, description: &str, input_schema: Value) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
    }
}

fn object(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn paging() -> Value {
    json!({
        "per_page": {
            "type": "integer",
            "description": "Items per request (default: 100)",
            "minimum": 1,
            "maximum": 100
        },
        "max_pages": {
            "type": "integer",
            "description": "Maximum number of pages to fetch",
            "minimum": 1
        }
    })
}

fn with_paging(mut properties: Value) -> Value {
    if let (Some(target), Value::Object(extra)) = (properties.as_object_mut(), paging()) {
        target.extend(extra);
    }
    properties
}

/// Every tool the server offers, in `tools/list` order.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    let project_id = json!({
        "type": "string",
        "description": "Project GraphQL node ID (e.g. PVT_kwDOA...)"
    });
    let issue_number = json!({ "type": "integer", "description": "Issue number", "minimum": 1 });
    let milestone_number =
        json!({ "type": "integer", "description": "Milestone number", "minimum": 1 });
    let labels = json!({
        "type": "array",
        "items": { "type": "string" },
        "description": "Label names"
    });

    vec![
        // Projects
        tool(
            "list_projects",
            "List GitHub projects (ProjectV2) of a user or organization",
            object(
                json!({
                    "owner": {
                        "type": "string",
                        "description": "Owner login (default: the configured repository owner)"
                    },
                    "first": {
                        "type": "integer",
                        "description": "Number of projects to return (default: 20)",
                        "minimum": 1,
                        "maximum": 100
                    }
                }),
                &[],
            ),
        ),
        tool(
            "get_project",
            "Get a GitHub project by node ID",
            object(json!({ "project_id": project_id }), &["project_id"]),
        ),
        tool(
            "create_project",
            "Create a GitHub project",
            object(
                json!({
                    "title": { "type": "string", "description": "Project title" },
                    "owner": {
                        "type": "string",
                        "description": "Owner login (default: the configured repository owner)"
                    }
                }),
                &["title"],
            ),
        ),
        tool(
            "update_project",
            "Update the title, description or closed state of a GitHub project",
            object(
                json!({
                    "project_id": project_id,
                    "title": { "type": "string" },
                    "description": { "type": "string", "description": "Short description" },
                    "closed": { "type": "boolean" }
                }),
                &["project_id"],
            ),
        ),
        tool(
            "delete_project",
            "Delete a GitHub project",
            object(json!({ "project_id": project_id }), &["project_id"]),
        ),
        // Issues
        tool(
            "list_issues",
            "List repository issues (pull requests are excluded)",
            object(
                with_paging(json!({
                    "state": {
                        "type": "string",
                        "enum": ["open", "closed", "all"],
                        "description": "Filter by issue state (default: open)"
                    },
                    "labels": labels,
                    "assignee": { "type": "string", "description": "Assignee login" },
                    "milestone": {
                        "type": "string",
                        "description": "Milestone number, \"none\" or \"*\""
                    }
                })),
                &[],
            ),
        ),
        tool(
            "get_issue",
            "Get a repository issue by number",
            object(json!({ "issue_number": issue_number }), &["issue_number"]),
        ),
        tool(
            "create_issue",
            "Create a repository issue",
            object(
                json!({
                    "title": { "type": "string" },
                    "body": { "type": "string", "description": "Markdown body" },
                    "labels": labels,
                    "assignees": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Assignee logins"
                    },
                    "milestone": { "type": "integer", "description": "Milestone number" }
                }),
                &["title"],
            ),
        ),
        tool(
            "update_issue",
            "Update a repository issue; omitted fields are left unchanged",
            object(
                json!({
                    "issue_number": issue_number,
                    "title": { "type": "string" },
                    "body": { "type": "string" },
                    "state": { "type": "string", "enum": ["open", "closed"] },
                    "labels": labels,
                    "assignees": { "type": "array", "items": { "type": "string" } },
                    "milestone": { "type": "integer" }
                }),
                &["issue_number"],
            ),
        ),
        tool(
            "search_issues",
            "Search issues in the repository using GitHub search syntax",
            object(
                with_paging(json!({
                    "query": {
                        "type": "string",
                        "description": "Search terms, e.g. \"crash label:bug\""
                    }
                })),
                &["query"],
            ),
        ),
        tool(
            "bulk_add_labels",
            "Add labels to several issues; failures are reported per issue",
            object(
                json!({
                    "issue_numbers": {
                        "type": "array",
                        "items": { "type": "integer", "minimum": 1 },
                        "minItems": 1
                    },
                    "labels": labels
                }),
                &["issue_numbers", "labels"],
            ),
        ),
        // Milestones
        tool(
            "list_milestones",
            "List repository milestones",
            object(
                with_paging(json!({
                    "state": {
                        "type": "string",
                        "enum": ["open", "closed", "all"],
                        "description": "Filter by milestone state (default: open)"
                    }
                })),
                &[],
            ),
        ),
        tool(
            "get_milestone",
            "Get a repository milestone by number",
            object(
                json!({ "milestone_number": milestone_number }),
                &["milestone_number"],
            ),
        ),
        tool(
            "create_milestone",
            "Create a repository milestone",
            object(
                json!({
                    "title": { "type": "string" },
                    "description": { "type": "string" },
                    "due_on": {
                        "type": "string",
                        "description": "Due date as ISO 8601 timestamp"
                    }
                }),
                &["title"],
            ),
        ),
        tool(
            "update_milestone",
            "Update a repository milestone",
            object(
                json!({
                    "milestone_number": milestone_number,
                    "title": { "type": "string" },
                    "description": { "type": "string" },
                    "due_on": { "type": "string" },
                    "state": { "type": "string", "enum": ["open", "closed"] }
                }),
                &["milestone_number"],
            ),
        ),
        tool(
            "delete_milestone",
            "Delete a repository milestone",
            object(
                json!({ "milestone_number": milestone_number }),
                &["milestone_number"],
            ),
        ),
        // Status
        tool(
            "get_api_status",
            "Show GitHub rate-limit quotas and response cache statistics",
            object(json!({}), &[]),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_tool_names_are_unique() {
        let tools = tool_definitions();
        assert_eq!(tools.len(), 17);

        let names: HashSet<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names.len(), tools.len());
    }

    #[test]
    fn test_required_fields_are_declared() {
        for tool in tool_definitions() {
            let schema = &tool.input_schema;
            assert_eq!(schema["type"], "object", "{}", tool.name);
            for required in schema["required"].as_array().unwrap() {
                let field = required.as_str().unwrap();
                assert!(
                    schema["properties"].get(field).is_some(),
                    "{} requires undeclared {}",
                    tool.name,
                    field
                );
            }
        }
    }

    #[test]
    fn test_paging_fields_are_merged() {
        let tools = tool_definitions();
        let list = tools.iter().find(|t| t.name == "list_issues").unwrap();
        let properties = &list.input_schema["properties"];
        assert!(properties.get("state").is_some());
        assert_eq!(properties["per_page"]["maximum"], 100);
    }
}
