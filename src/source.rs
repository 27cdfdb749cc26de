use crate::dates::DateRange;
use crate::models::{Issue, TogglEntry, TogglGroup, TogglSummaryResponse, TogglWorkspaceUser};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("Request failed: {0}")]
    Transport(String),
    #[error("Unexpected response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Malformed(err.to_string())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

/// Where issues come from. The Jira client in production, fakes in tests.
#[async_trait]
pub trait IssueSource: Send + Sync {
    async fn fetch_issue(&self, key: &str) -> Result<Issue, FetchError>;
}

#[async_trait]
pub trait TimeEntrySource: Send + Sync {
    /// Every detailed entry in the range, all pages included.
    async fn fetch_time_entries(
        &self,
        range: &DateRange,
        group: Option<i64>,
    ) -> Result<Vec<TogglEntry>, FetchError>;

    async fn fetch_summary(
        &self,
        range: &DateRange,
        group: Option<i64>,
    ) -> Result<TogglSummaryResponse, FetchError>;

    async fn fetch_groups(&self) -> Result<Vec<TogglGroup>, FetchError>;

    async fn fetch_workspace_users(&self) -> Result<Vec<TogglWorkspaceUser>, FetchError>;
}
