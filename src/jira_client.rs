use crate::config::{JiraFieldIds, Settings};
use crate::models::*;
use crate::source::{FetchError, IssueSource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

#[derive(Clone)]
pub struct JiraClient {
    client: reqwest::Client,
    base_url: String,
    username: String,
    api_token: String,
    fields: JiraFieldIds,
}

impl JiraClient {
    pub fn new(settings: &Settings) -> Result<Self, FetchError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );

        Ok(Self {
            client: reqwest::Client::builder().default_headers(headers).build()?,
            base_url: settings.jira_base_url.clone(),
            username: settings.jira_username.clone(),
            api_token: settings.jira_api_token.clone(),
            fields: settings.jira_fields.clone(),
        })
    }

    async fn _get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(url)
            .basic_auth(&self.username, Some(&self.api_token))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(path.to_string()));
        }
        Ok(response.error_for_status()?.json::<T>().await?)
    }

    pub async fn get_issue(&self, key: &str) -> Result<JiraIssue, FetchError> {
        self._get(&format!("/rest/api/2/issue/{}", key))
            .await
            .map_err(|err| match err {
                FetchError::NotFound(_) => FetchError::NotFound(key.to_string()),
                other => other,
            })
    }
}

#[async_trait]
impl IssueSource for JiraClient {
    async fn fetch_issue(&self, key: &str) -> Result<Issue, FetchError> {
        let payload = self.get_issue(key).await?;
        parse_issue(payload, &self.fields)
    }
}

/// Turns the raw REST payload into an [`Issue`], reading the custom fields
/// named in `fields`. Resolved epic/parent ids are left empty.
pub fn parse_issue(payload: JiraIssue, fields: &JiraFieldIds) -> Result<Issue, FetchError> {
    let JiraIssue { id, key, fields: raw } = payload;
    let custom = |name: &str| raw.custom.get(name).filter(|value| !value.is_null());

    let parent_key = raw.parent.as_ref().map(|parent| parent.key.clone());
    let epic_key = custom(&fields.epic).and_then(Value::as_str).map(str::to_string);

    Ok(Issue {
        id: parse_id(&id)?,
        issue_type: IssueType {
            id: parse_id(&raw.issue_type.id)?,
            name: raw.issue_type.name.clone(),
            subtask: raw.issue_type.subtask,
        },
        created: parse_timestamp(&raw.created)?,
        updated: raw.updated.as_deref().map(parse_timestamp).transpose()?,
        summary: raw.summary.clone(),
        project: Project {
            id: parse_id(&raw.project.id)?,
            key: raw.project.key.clone(),
            name: raw.project.name.clone(),
        },
        impact: custom(&fields.impact).and_then(named_option),
        epic_key: epic_key.filter(|epic| *epic != key),
        epic_id: None,
        parent_key: parent_key.filter(|parent| *parent != key),
        parent_id: None,
        support_request_type: custom(&fields.request_type).and_then(request_type),
        is_roadmap_item: custom(&fields.roadmap).map(is_truthy).unwrap_or(false),
        components: raw
            .components
            .iter()
            .map(|component| {
                Ok(Named {
                    id: parse_id(&component.id)?,
                    name: component.name.clone(),
                })
            })
            .collect::<Result<Vec<_>, FetchError>>()?,
        drivers: custom(&fields.drivers).map(named_options).unwrap_or_default(),
        client_labels: custom(&fields.clients).map(labels).unwrap_or_default(),
        product_labels: custom(&fields.products).map(labels).unwrap_or_default(),
        user_types: custom(&fields.user_types).map(named_options).unwrap_or_default(),
        key,
    })
}

fn parse_id(value: &str) -> Result<i64, FetchError> {
    value
        .parse::<i64>()
        .map_err(|_| FetchError::Malformed(format!("non-numeric id {}", value)))
}

// Jira sends `2024-03-08T10:15:00.000+0000`, which is not quite RFC 3339.
fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, FetchError> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|_| FetchError::Malformed(format!("bad timestamp {}", value)))
}

fn named_option(value: &Value) -> Option<Named> {
    let id = match value.get("id")? {
        Value::String(id) => id.parse::<i64>().ok()?,
        Value::Number(id) => id.as_i64()?,
        _ => return None,
    };
    let name = value
        .get("value")
        .or_else(|| value.get("name"))
        .and_then(Value::as_str)?;
    Some(Named {
        id,
        name: name.to_string(),
    })
}

fn named_options(value: &Value) -> Vec<Named> {
    match value {
        Value::Array(values) => values.iter().filter_map(named_option).collect(),
        single => named_option(single).into_iter().collect(),
    }
}

// Service desk wraps the request type one level down.
fn request_type(value: &Value) -> Option<Named> {
    value
        .get("requestType")
        .map_or_else(|| named_option(value), named_option)
}

fn labels(value: &Value) -> Vec<String> {
    match value {
        Value::Array(values) => values
            .iter()
            .filter_map(|label| {
                label
                    .as_str()
                    .map(str::to_string)
                    .or_else(|| named_option(label).map(|named| named.name))
            })
            .collect(),
        Value::String(label) => vec![label.clone()],
        _ => Vec::new(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Array(values) => !values.is_empty(),
        Value::String(text) => matches!(text.to_lowercase().as_str(), "yes" | "true"),
        Value::Object(_) => value
            .get("value")
            .map(is_truthy)
            .unwrap_or(false),
        _ => false,
    }
}
