use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

#[derive(Deserialize, Debug, Clone)]
pub struct JiraIssue {
    pub id: String,
    pub key: String,
    pub fields: JiraIssueFields,
}

#[derive(Deserialize, Debug, Clone)]
pub struct JiraIssueFields {
    pub summary: String,
    #[serde(rename = "issuetype")]
    pub issue_type: JiraIssueType,
    pub project: JiraProject,
    pub created: String,
    pub updated: Option<String>,
    pub parent: Option<JiraIssueRef>,
    #[serde(default)]
    pub components: Vec<JiraComponent>,
    /// Every `customfield_*` the instance returns; picked apart with the
    /// configured field ids.
    #[serde(flatten)]
    pub custom: HashMap<String, serde_json::Value>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct JiraIssueType {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub subtask: bool,
}

#[derive(Deserialize, Debug, Clone)]
pub struct JiraProject {
    pub id: String,
    pub key: String,
    pub name: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct JiraIssueRef {
    pub key: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct JiraComponent {
    pub id: String,
    pub name: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TogglDetailsResponse {
    pub total_count: u64,
    pub per_page: u64,
    pub data: Vec<TogglEntry>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TogglEntry {
    pub id: i64,
    pub pid: Option<i64>,
    pub tid: Option<i64>,
    pub uid: i64,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub dur: i64,
    pub user: String,
    pub project: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TogglSummaryResponse {
    pub total_grand: Option<i64>,
    pub data: Vec<TogglSummaryProject>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TogglSummaryProject {
    pub title: TogglSummaryTitle,
    pub time: i64,
    #[serde(default)]
    pub items: Vec<TogglSummaryItem>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct TogglSummaryTitle {
    pub project: Option<String>,
    pub time_entry: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TogglSummaryItem {
    pub title: TogglSummaryTitle,
    pub time: i64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TogglGroup {
    pub id: i64,
    pub wid: i64,
    pub name: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TogglWorkspaceUser {
    pub uid: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub group_ids: Option<Vec<i64>>,
}

impl TogglWorkspaceUser {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .filter(|name| !name.is_empty())
            .or_else(|| self.email.clone())
            .unwrap_or_else(|| format!("user {}", self.uid))
    }
}

/// Id + display name of a Jira lookup value (component, impact, driver...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Named {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueType {
    pub id: i64,
    pub name: String,
    pub subtask: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub id: i64,
    pub key: String,
    pub name: String,
}

/// A Jira issue as stored locally. `epic_id` and `parent_id` point at other
/// rows of `jira_issues` and stay empty until the referenced issue exists.
#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub id: i64,
    pub key: String,
    pub issue_type: IssueType,
    pub created: DateTime<Utc>,
    pub updated: Option<DateTime<Utc>>,
    pub summary: String,
    pub project: Project,
    pub impact: Option<Named>,
    pub epic_key: Option<String>,
    pub epic_id: Option<i64>,
    pub parent_key: Option<String>,
    pub parent_id: Option<i64>,
    pub support_request_type: Option<Named>,
    pub is_roadmap_item: bool,
    pub components: Vec<Named>,
    pub drivers: Vec<Named>,
    pub client_labels: Vec<String>,
    pub product_labels: Vec<String>,
    pub user_types: Vec<Named>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeEntry {
    pub id: i64,
    pub user_id: i64,
    pub user: String,
    pub project_id: Option<i64>,
    pub project: Option<String>,
    pub task_id: Option<i64>,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_ms: i64,
    pub issue_key: Option<String>,
    pub issue_id: Option<i64>,
    pub error: Option<ErrorCode>,
}

impl TimeEntry {
    pub fn hours(&self) -> f64 {
        crate::aggregate::ms_to_hours(self.duration_ms)
    }
}

/// A time entry joined with the issue it is linked to, as read back for reports.
#[derive(Debug, Clone)]
pub struct LinkedEntry {
    pub entry: TimeEntry,
    pub issue: Option<Issue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    BadIssueKey,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BadIssueKey => "BAD_ISSUE_KEY",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "BAD_ISSUE_KEY" => Some(ErrorCode::BadIssueKey),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which self-reference of an issue is being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    Epic,
    Parent,
}

impl Relation {
    pub fn key_column(&self) -> &'static str {
        match self {
            Relation::Epic => "epic_key",
            Relation::Parent => "parent_key",
        }
    }

    pub fn id_column(&self) -> &'static str {
        match self {
            Relation::Epic => "epic_id",
            Relation::Parent => "parent_id",
        }
    }

    pub fn error_column(&self) -> &'static str {
        match self {
            Relation::Epic => "epic_error",
            Relation::Parent => "parent_error",
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relation::Epic => f.write_str("epic"),
            Relation::Parent => f.write_str("parent"),
        }
    }
}

/// A stored row (issue or time entry) carrying a raw key that needs linking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlinkedRow {
    pub id: i64,
    pub key: String,
}

/// Issues sitting directly below a given epic or parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSelector {
    EpicId(i64),
    ParentId(i64),
}

/// Fields copied from an epic or parent onto its children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagatedFields {
    pub is_roadmap_item: bool,
    pub epic_key: Option<String>,
    pub epic_id: Option<i64>,
}
