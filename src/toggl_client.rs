use crate::config::Settings;
use crate::dates::DateRange;
use crate::models::*;
use crate::source::{FetchError, TimeEntrySource};
use async_trait::async_trait;

const USER_AGENT: &str = "jiggl";
const REPORTS_URL: &str = "https://api.track.toggl.com/reports/api/v2";
const API_URL: &str = "https://api.track.toggl.com/api/v8";

pub struct TogglClient {
    client: reqwest::Client,
    api_key: String,
    workspace_id: i64,
}

impl TogglClient {
    pub fn new(settings: &Settings) -> Result<Self, FetchError> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            api_key: settings.toggl_api_key.clone(),
            workspace_id: settings.toggl_workspace,
        })
    }

    async fn _get<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let response = self
            .client
            .get(url)
            .basic_auth(&self.api_key, Some("api_token"))
            .query(query)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(url.to_string()));
        }
        Ok(response.error_for_status()?.json::<T>().await?)
    }

    fn report_params(&self, range: &DateRange, group: Option<i64>) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("user_agent", USER_AGENT.to_string()),
            ("workspace_id", self.workspace_id.to_string()),
            ("since", range.since_param()),
            ("until", range.until_param()),
        ];
        if let Some(group) = group {
            params.push(("members_of_group_ids", group.to_string()));
        }
        params
    }
}

#[async_trait]
impl TimeEntrySource for TogglClient {
    async fn fetch_time_entries(
        &self,
        range: &DateRange,
        group: Option<i64>,
    ) -> Result<Vec<TogglEntry>, FetchError> {
        let mut entries: Vec<TogglEntry> = Vec::new();
        let mut page = 1u64;

        loop {
            let mut params = self.report_params(range, group);
            params.push(("page", page.to_string()));
            let response = self
                ._get::<TogglDetailsResponse>(&format!("{}/details", REPORTS_URL), &params)
                .await?;

            let received = response.data.len();
            entries.extend(response.data);

            if received == 0 || page * response.per_page.max(1) >= response.total_count {
                break;
            }
            page += 1;
        }

        tracing::debug!(count = entries.len(), %range, "fetched toggl entries");
        Ok(entries)
    }

    async fn fetch_summary(
        &self,
        range: &DateRange,
        group: Option<i64>,
    ) -> Result<TogglSummaryResponse, FetchError> {
        let params = self.report_params(range, group);
        self._get(&format!("{}/summary", REPORTS_URL), &params).await
    }

    async fn fetch_groups(&self) -> Result<Vec<TogglGroup>, FetchError> {
        let url = format!("{}/workspaces/{}/groups", API_URL, self.workspace_id);
        // Toggl answers `null` rather than `[]` for a workspace without groups.
        let groups: Option<Vec<TogglGroup>> = self._get(&url, &[]).await?;
        Ok(groups.unwrap_or_default())
    }

    async fn fetch_workspace_users(&self) -> Result<Vec<TogglWorkspaceUser>, FetchError> {
        let url = format!("{}/workspaces/{}/workspace_users", API_URL, self.workspace_id);
        let users: Option<Vec<TogglWorkspaceUser>> = self._get(&url, &[]).await?;
        Ok(users.unwrap_or_default())
    }
}
